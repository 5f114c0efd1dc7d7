//! Image validation policy
//!
//! Runs as soon as the header is available, before the bulk of the image has
//! been transferred (or written anywhere). A rejected header kills the
//! session with nothing past the header consumed by storage.

use crate::header::ImageHeader;

/// Reasons a candidate image was rejected
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Header bytes did not parse at the expected offset
    Malformed,
    /// The stream ended before the header window was filled
    Truncated,
    /// Policy rejected the candidate's version
    VersionRejected,
}

/// Decides whether a parsed header is acceptable to install
pub trait ImageValidator {
    fn validate(&mut self, header: &ImageHeader) -> Result<(), ValidationError>;
}

/// Read side of the currently running image's descriptor (diagnostics)
pub trait RunningImage {
    fn running_version(&self) -> &str;
}

/// Baseline validator: logs the running firmware version alongside the
/// candidate's and accepts everything.
///
/// `reject_same_version` is the one built-in policy knob, for deployments
/// that want re-installation of the running version refused. Anything
/// richer belongs in a custom [`ImageValidator`].
pub struct VersionGate<R> {
    running: R,
    reject_same_version: bool,
}

impl<R: RunningImage> VersionGate<R> {
    pub fn new(running: R) -> Self {
        Self {
            running,
            reject_same_version: false,
        }
    }

    #[must_use]
    pub fn reject_same_version(mut self) -> Self {
        self.reject_same_version = true;
        self
    }
}

impl<R: RunningImage> ImageValidator for VersionGate<R> {
    fn validate(&mut self, header: &ImageHeader) -> Result<(), ValidationError> {
        #[cfg(feature = "defmt")]
        defmt::info!(
            "running firmware version: {=str}, candidate: {=str}",
            self.running.running_version(),
            header.version()
        );

        if self.reject_same_version && header.version() == self.running.running_version() {
            return Err(ValidationError::VersionRejected);
        }
        Ok(())
    }
}
