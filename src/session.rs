//! Update session state machine
//!
//! One session ties a source, an optional decrypt transform, the validator,
//! and the slot writer together:
//!
//! ```text
//! Fetching -> HeaderPending -> Streaming -> Finalizing -> Rebooting
//!     \            \              \            \-> Aborted
//!      \            \              \-> Aborted
//!       \            \-> Aborted
//!        \-> Aborted
//! ```
//!
//! Every abort path discards the in-progress slot write before the session
//! ends; a partial image is never left bootable. On success the device
//! restarts, so in-process callers only ever observe failures.

use embedded_hal_async::delay::DelayNs;

use crate::{
    header::{ImageHeader, HEADER_END, HEADER_OFFSET},
    power::DevicePower,
    request::URL_MAX_LEN,
    source::{ImageSource, SourceError, SourcePoll},
    storage::{SlotWriter, StorageError},
    transform::{DecryptTransform, TransformError},
    validate::{ImageValidator, ValidationError},
};

/// Ciphertext bytes pulled from the source per read.
pub const CHUNK_LEN: usize = 1024;

/// Pause between a successful commit and the restart, giving loggers and
/// pending I/O a chance to drain.
pub const REBOOT_SETTLE_MS: u32 = 1000;

/// Where the session currently is (or where it ended)
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the transport
    Fetching,
    /// Collecting plaintext until the header window is full
    HeaderPending,
    /// Header approved; bytes flow straight to the slot writer
    Streaming,
    /// Stream ended; completeness check and commit
    Finalizing,
    /// Terminal: image committed, restart triggered
    Rebooting,
    /// Terminal: session failed, slot discarded
    Aborted,
}

/// Errors terminal to a session
///
/// There is no internal retry: each of these ends the session, after the
/// slot write has been discarded.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum SessionError<SE, WE, TE> {
    /// The transport could not be opened
    SourceUnavailable(SourceError<SE>),
    /// The transport failed mid-stream
    SourceRead(SourceError<SE>),
    /// The header was rejected, or could not be parsed at all
    ValidationFailed(ValidationError),
    /// The decrypt transform reported a non-transient error
    Decrypt(TransformError<TE>),
    /// The stream ended before the full image was received
    IncompleteTransfer,
    /// Writing to the slot failed
    StorageWrite(StorageError<WE>),
    /// The written image failed the commit-time integrity check
    IntegrityCheckFailed,
}

impl<SE, WE, TE> From<StorageError<WE>> for SessionError<SE, WE, TE> {
    fn from(value: StorageError<WE>) -> Self {
        SessionError::StorageWrite(value)
    }
}

/// Terminal record of a finished session
///
/// `outcome` is diagnostic: by the time a successful report exists the
/// device is restarting (real [`DevicePower`] implementations never
/// return), so only failures are ever observed in-process.
#[derive(Debug)]
pub struct SessionReport<SE, WE, TE> {
    pub outcome: Result<(), SessionError<SE, WE, TE>>,
    pub phase: Phase,
    /// Source-side bytes consumed when the session ended
    pub bytes_read: usize,
}

/// Collects the first [`HEADER_END`] plaintext bytes across arbitrarily
/// chunked transform outputs, so the header parses exactly once no matter
/// how the stream was split.
pub(crate) struct HeaderAccumulator {
    buf: [u8; HEADER_END],
    fill: usize,
}

pub(crate) enum Absorbed<'a> {
    /// Still short of the header window; all bytes were retained
    Pending,
    /// The window just filled. `spill` is the tail of this chunk lying
    /// beyond it.
    Ready { spill: &'a [u8] },
}

impl HeaderAccumulator {
    pub(crate) const fn new() -> Self {
        Self {
            buf: [0_u8; HEADER_END],
            fill: 0,
        }
    }

    pub(crate) fn absorb<'a>(&mut self, plaintext: &'a [u8]) -> Absorbed<'a> {
        let need = HEADER_END - self.fill;
        if plaintext.len() < need {
            self.buf[self.fill..self.fill + plaintext.len()].copy_from_slice(plaintext);
            self.fill += plaintext.len();
            return Absorbed::Pending;
        }
        let (head, spill) = plaintext.split_at(need);
        self.buf[self.fill..].copy_from_slice(head);
        self.fill = HEADER_END;
        Absorbed::Ready { spill }
    }

    pub(crate) fn parse(&self) -> Option<ImageHeader> {
        ImageHeader::take_from_bytes(&self.buf[HEADER_OFFSET..]).map(|(h, _)| h)
    }

    /// The buffered image prefix, to be flushed to storage once the
    /// validator approves.
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buf[..self.fill]
    }
}

/// One in-flight update. Created by the supervisor, driven to a terminal
/// phase by [`run`](Self::run) on its own execution context.
pub struct UpdateSession<S, W, T, V, D, R> {
    source: S,
    writer: W,
    transform: Option<T>,
    validator: V,
    delay: D,
    power: R,
    url: heapless::String<URL_MAX_LEN>,
    chunk: [u8; CHUNK_LEN],
    hdr: HeaderAccumulator,
    header: Option<ImageHeader>,
    /// Last `in_progress` report from the transform
    transform_pending: bool,
    phase: Phase,
    bytes_read: usize,
}

impl<S, W, T, V, D, R> UpdateSession<S, W, T, V, D, R>
where
    S: ImageSource,
    W: SlotWriter,
    T: DecryptTransform,
    V: ImageValidator,
    D: DelayNs,
    R: DevicePower,
{
    pub(crate) fn new(
        url: heapless::String<URL_MAX_LEN>,
        source: S,
        writer: W,
        transform: Option<T>,
        validator: V,
        delay: D,
        power: R,
    ) -> Self {
        Self {
            source,
            writer,
            transform,
            validator,
            delay,
            power,
            url,
            chunk: [0_u8; CHUNK_LEN],
            hdr: HeaderAccumulator::new(),
            header: None,
            transform_pending: false,
            phase: Phase::Fetching,
            bytes_read: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// The validated header, once `HeaderPending` has been passed.
    pub fn header(&self) -> Option<&ImageHeader> {
        self.header.as_ref()
    }

    /// Drive the session to a terminal phase.
    ///
    /// On success the settle delay elapses and the device restarts; on any
    /// failure the slot write is discarded and the owned source, transform,
    /// and writer handles are released when the session drops.
    pub async fn run(mut self) -> SessionReport<S::Error, W::Error, T::Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("starting update session ({=str})", self.url.as_str());

        match self.drive().await {
            Ok(()) => {
                self.phase = Phase::Rebooting;
                #[cfg(feature = "defmt")]
                defmt::info!("image committed, rebooting");
                self.delay.delay_ms(REBOOT_SETTLE_MS).await;
                self.power.restart().await;
                // A real DevicePower never gets here; test doubles do.
                SessionReport {
                    outcome: Ok(()),
                    phase: Phase::Rebooting,
                    bytes_read: self.bytes_read,
                }
            }
            Err(err) => {
                self.phase = Phase::Aborted;
                self.writer.discard().await;
                #[cfg(feature = "defmt")]
                defmt::error!("update session aborted");
                SessionReport {
                    outcome: Err(err),
                    phase: Phase::Aborted,
                    bytes_read: self.bytes_read,
                }
            }
        }
    }

    async fn drive(&mut self) -> Result<(), SessionError<S::Error, W::Error, T::Error>> {
        // Fetching
        self.source
            .open(self.url.as_str())
            .await
            .map_err(SessionError::SourceUnavailable)?;
        self.phase = Phase::HeaderPending;

        // The slot is claimed before any bytes arrive; if anything fails
        // from here on, run() discards it again.
        self.writer.begin().await?;

        loop {
            let poll = self
                .source
                .read_next(&mut self.chunk)
                .await
                .map_err(SessionError::SourceRead)?;
            self.bytes_read = self.source.bytes_read();
            let n = match poll {
                // Stalled but not done; keep polling. No stall timeout
                // here (see the crate docs).
                SourcePoll::Data(0) => continue,
                SourcePoll::Data(n) => n,
                SourcePoll::EndOfStream => break,
            };
            #[cfg(feature = "defmt")]
            defmt::debug!("image bytes read: {=usize}", self.bytes_read);

            // Split borrows: the transform output may alias the chunk
            // buffer, while the writer and header state advance.
            let Self {
                writer,
                transform,
                validator,
                chunk,
                hdr,
                header,
                transform_pending,
                phase,
                ..
            } = self;
            let ciphertext: &[u8] = &chunk[..n];
            let plaintext = match transform {
                Some(t) => {
                    let out = t.feed(ciphertext).map_err(SessionError::Decrypt)?;
                    *transform_pending = out.in_progress;
                    out.plaintext
                }
                None => ciphertext,
            };
            if plaintext.is_empty() {
                // "not finished": no output yet, keep feeding
                continue;
            }

            if *phase == Phase::Streaming {
                writer.write(plaintext).await?;
                continue;
            }

            // HeaderPending: nothing reaches storage until the validator
            // has approved the header.
            match hdr.absorb(plaintext) {
                Absorbed::Pending => {}
                Absorbed::Ready { spill } => {
                    let parsed = hdr
                        .parse()
                        .ok_or(SessionError::ValidationFailed(ValidationError::Malformed))?;
                    validator
                        .validate(&parsed)
                        .map_err(SessionError::ValidationFailed)?;
                    *header = Some(parsed);
                    writer.write(hdr.buffered()).await?;
                    if !spill.is_empty() {
                        writer.write(spill).await?;
                    }
                    *phase = Phase::Streaming;
                }
            }
        }

        // Finalizing
        self.phase = Phase::Finalizing;
        self.bytes_read = self.source.bytes_read();
        if !self.source.is_complete() {
            return Err(SessionError::IncompleteTransfer);
        }
        if self.transform_pending {
            return Err(SessionError::Decrypt(TransformError::Truncated));
        }
        if self.header.is_none() {
            // Stream "completed" without ever filling the header window
            return Err(SessionError::ValidationFailed(ValidationError::Truncated));
        }
        match self.writer.commit().await {
            Ok(()) => Ok(()),
            Err(StorageError::IntegrityCheckFailed) => Err(SessionError::IntegrityCheckFailed),
            Err(e) => Err(SessionError::StorageWrite(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::prelude::rust_2021::*;
    use std::vec::Vec;

    use super::*;
    use crate::testutils::session_support::build_image;

    // Feeds chunks until the window fills, like the session does; absorb is
    // never called again once the header is out.
    fn fill(acc: &mut HeaderAccumulator, data: &[u8], chunk_len: usize) -> ImageHeader {
        let mut parsed = Vec::new();
        for chunk in data.chunks(chunk_len) {
            match acc.absorb(chunk) {
                Absorbed::Pending => {}
                Absorbed::Ready { .. } => {
                    parsed.push(acc.parse().unwrap());
                    break;
                }
            }
        }
        assert_eq!(parsed.len(), 1, "header must become ready exactly once");
        parsed.remove(0)
    }

    #[test]
    fn header_parse_is_chunking_independent() {
        let image = build_image("3.1.4", 300, None);

        let mut one_shot = HeaderAccumulator::new();
        let big = fill(&mut one_shot, &image, image.len());

        let mut dribble = HeaderAccumulator::new();
        let small = fill(&mut dribble, &image, 1);

        let mut odd = HeaderAccumulator::new();
        let medium = fill(&mut odd, &image, 7);

        assert_eq!(big, small);
        assert_eq!(big, medium);
        assert_eq!(big.version(), "3.1.4");
    }

    #[test]
    fn spill_carries_bytes_past_the_window() {
        let image = build_image("1.0", 100, None);
        let mut acc = HeaderAccumulator::new();
        match acc.absorb(&image) {
            Absorbed::Ready { spill } => {
                assert_eq!(spill, &image[HEADER_END..]);
                assert_eq!(acc.buffered(), &image[..HEADER_END]);
            }
            Absorbed::Pending => panic!("window should have filled"),
        }
    }

    #[test]
    fn exact_window_has_empty_spill() {
        let image = build_image("1.0", 0, None);
        assert_eq!(image.len(), HEADER_END);
        let mut acc = HeaderAccumulator::new();
        match acc.absorb(&image) {
            Absorbed::Ready { spill } => assert!(spill.is_empty()),
            Absorbed::Pending => panic!("window should have filled"),
        }
    }
}
