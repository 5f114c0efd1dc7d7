//! Image source abstraction
//!
//! Models the network transport delivering firmware bytes. The HTTP(S)/TLS
//! machinery itself lives outside this crate; implementations wrap it and
//! expose the pull interface below.

use core::future::Future;

/// Errors returned by [`ImageSource`] implementations
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum SourceError<C> {
    /// The transport could not be opened
    Unavailable,
    /// The transport failed after it was opened
    Interrupted,
    /// Error types specific to the implementor
    Custom(C),
}

impl<C> From<C> for SourceError<C> {
    fn from(value: C) -> Self {
        SourceError::Custom(value)
    }
}

/// Result of a single [`ImageSource::read_next`] call
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
pub enum SourcePoll {
    /// `n` bytes were placed at the start of the caller's buffer.
    ///
    /// `n` may be zero: the transport is stalled but not done. Callers keep
    /// polling.
    Data(usize),
    /// The stream is over. Whether all expected bytes arrived is reported
    /// separately by [`ImageSource::is_complete`].
    EndOfStream,
}

/// Pull-based byte stream yielding a firmware image
pub trait ImageSource {
    type Error: core::fmt::Debug + PartialEq;

    /// Open a connection to the given URL.
    fn open(
        &mut self,
        url: &str,
    ) -> impl Future<Output = Result<(), SourceError<Self::Error>>>;

    /// Pull the next chunk into `buf`.
    ///
    /// May block (asynchronously) on network I/O. Never yields more than
    /// `buf.len()` bytes.
    fn read_next(
        &mut self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<SourcePoll, SourceError<Self::Error>>>;

    /// Total bytes handed out by [`read_next`](Self::read_next) so far.
    fn bytes_read(&self) -> usize;

    /// Whether the transport delivered the complete body (e.g. received
    /// length matches the announced content length).
    fn is_complete(&self) -> bool;
}
