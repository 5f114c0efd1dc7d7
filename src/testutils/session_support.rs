//! Scripted doubles for driving whole update sessions on the host
//!
//! [`ScriptedSource`] plays back a canned chunk sequence (with optional
//! stalls and injected failures), [`XorStream`] is a block-buffered stand-in
//! for a real cipher, and the remaining types record what the session did
//! to them.

extern crate std;
use std::prelude::rust_2021::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::vec;
use std::vec::Vec;

use crate::{
    header::{ImageHeader, HEADER_END, HEADER_OFFSET},
    power::DevicePower,
    source::{ImageSource, SourceError, SourcePoll},
    transform::{DecryptProvider, DecryptTransform, TransformError, TransformOutput},
    validate::{ImageValidator, RunningImage, ValidationError},
};

/// Build a well-formed image: fake vector table, header, patterned payload.
///
/// `declared_len` overrides the header's length field; `None` declares the
/// actual total length, `Some(0)` leaves the length undeclared.
#[must_use]
pub fn build_image(version: &str, payload_len: usize, declared_len: Option<u32>) -> Vec<u8> {
    let total = HEADER_END + payload_len;
    #[allow(clippy::cast_possible_truncation)]
    let declared = declared_len.unwrap_or(total as u32);
    let mut image = vec![0_u8; total];
    for (i, b) in image[..HEADER_OFFSET].iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        {
            *b = 0xE0 | (i as u8 & 0x0F);
        }
    }
    let header = ImageHeader::new(version, declared).unwrap();
    header.write_to_bytes(&mut image[HEADER_OFFSET..]).unwrap();
    for (i, b) in image[HEADER_END..].iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        {
            *b = (i % 251) as u8;
        }
    }
    image
}

/// An [`ImageSource`] playing back a canned chunk script.
///
/// An empty chunk plays back as a zero-length read (a stall); failures are
/// injected with the builder methods.
pub struct ScriptedSource {
    chunks: Vec<Vec<u8>>,
    next: usize,
    bytes: usize,
    opened: bool,
    fail_open: bool,
    /// Fail the read that would deliver this chunk index
    fail_at: Option<usize>,
    /// Report the stream as incomplete even after the last chunk
    truncated: bool,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            next: 0,
            bytes: 0,
            opened: false,
            fail_open: false,
            fail_at: None,
            truncated: false,
        }
    }

    #[must_use]
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    #[must_use]
    pub fn fail_at(mut self, chunk_index: usize) -> Self {
        self.fail_at = Some(chunk_index);
        self
    }

    #[must_use]
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

impl ImageSource for ScriptedSource {
    type Error = ();

    async fn open(&mut self, _url: &str) -> Result<(), SourceError<()>> {
        if self.fail_open {
            return Err(SourceError::Unavailable);
        }
        self.opened = true;
        Ok(())
    }

    async fn read_next(&mut self, buf: &mut [u8]) -> Result<SourcePoll, SourceError<()>> {
        assert!(self.opened, "read_next before open");
        if self.fail_at == Some(self.next) {
            return Err(SourceError::Interrupted);
        }
        let Some(chunk) = self.chunks.get(self.next) else {
            return Ok(SourcePoll::EndOfStream);
        };
        self.next += 1;
        if chunk.is_empty() {
            return Ok(SourcePoll::Data(0));
        }
        assert!(buf.len() >= chunk.len(), "scripted chunk exceeds read buffer");
        buf[..chunk.len()].copy_from_slice(chunk);
        self.bytes += chunk.len();
        Ok(SourcePoll::Data(chunk.len()))
    }

    fn bytes_read(&self) -> usize {
        self.bytes
    }

    fn is_complete(&self) -> bool {
        !self.truncated && self.next >= self.chunks.len()
    }
}

/// Keystream block size of [`XorStream`]
pub const XOR_BLOCK: usize = 16;

/// XOR "cipher" that only releases whole [`XOR_BLOCK`]-sized blocks,
/// buffering the remainder like a real block cipher would.
pub struct XorStream {
    key: Vec<u8>,
    pending: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
}

impl XorStream {
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            pending: Vec::new(),
            out: Vec::new(),
            pos: 0,
        }
    }
}

impl DecryptTransform for XorStream {
    type Error = core::convert::Infallible;

    fn feed<'a>(
        &'a mut self,
        ciphertext: &'a [u8],
    ) -> Result<TransformOutput<'a>, TransformError<Self::Error>> {
        self.pending.extend_from_slice(ciphertext);
        self.out.clear();
        let whole = self.pending.len() - self.pending.len() % XOR_BLOCK;
        for b in self.pending.drain(..whole) {
            self.out.push(b ^ self.key[self.pos % self.key.len()]);
            self.pos += 1;
        }
        Ok(TransformOutput {
            plaintext: &self.out,
            in_progress: !self.pending.is_empty(),
        })
    }
}

/// XOR-encrypt a plaintext with the same keystream [`XorStream`] applies.
#[must_use]
pub fn xor_encrypt(key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    plaintext
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

/// Provider minting [`XorStream`] transforms; rejects empty key material.
pub struct XorProvider;

impl DecryptProvider for XorProvider {
    type Transform = XorStream;

    fn create(
        &self,
        key_material: &[u8],
    ) -> Result<XorStream, TransformError<core::convert::Infallible>> {
        if key_material.is_empty() {
            return Err(TransformError::BadKeyMaterial);
        }
        Ok(XorStream::new(key_material))
    }
}

/// Validator counting how often it ran, optionally rejecting everything
pub struct CountingValidator {
    calls: Arc<AtomicUsize>,
    reject: bool,
}

impl CountingValidator {
    #[must_use]
    pub fn new(calls: Arc<AtomicUsize>, reject: bool) -> Self {
        Self { calls, reject }
    }
}

impl ImageValidator for CountingValidator {
    fn validate(&mut self, _header: &ImageHeader) -> Result<(), ValidationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(ValidationError::VersionRejected);
        }
        Ok(())
    }
}

/// Fixed descriptor of the "running" firmware
pub struct FixedRunningImage(pub &'static str);

impl RunningImage for FixedRunningImage {
    fn running_version(&self) -> &str {
        self.0
    }
}

/// A delay provider that returns immediately
pub struct InstantDelay;

impl embedded_hal_async::delay::DelayNs for InstantDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Counts restart requests instead of resetting anything
pub struct RecordingPower {
    restarts: Arc<AtomicUsize>,
}

impl RecordingPower {
    #[must_use]
    pub fn new(restarts: Arc<AtomicUsize>) -> Self {
        Self { restarts }
    }
}

impl DevicePower for RecordingPower {
    async fn restart(&mut self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}
