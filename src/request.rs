//! Update request
//!
//! The immutable record handed to the supervisor at the public entry point.
//! Once a session has been admitted the request cannot change.

/// Longest accepted image URL, in bytes.
pub const URL_MAX_LEN: usize = 256;

/// Errors from building an [`UpdateRequest`]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The URL exceeds [`URL_MAX_LEN`] bytes. Overlong URLs are rejected
    /// outright rather than silently truncated.
    UrlTooLong,
}

/// A request to fetch and install a firmware image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    url: heapless::String<URL_MAX_LEN>,
}

impl UpdateRequest {
    pub fn new(url: &str) -> Result<Self, RequestError> {
        let mut bounded = heapless::String::new();
        bounded
            .push_str(url)
            .map_err(|()| RequestError::UrlTooLong)?;
        Ok(Self { url: bounded })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn into_url(self) -> heapless::String<URL_MAX_LEN> {
        self.url
    }
}
