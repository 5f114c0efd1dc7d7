//! Inactive-slot storage writer
//!
//! [`SlotWriter`] is the session's view of the target slot: begin, stream
//! bytes, then either commit (the image becomes bootable) or discard
//! (nothing bootable is left behind). [`FlashSlotWriter`] is the production
//! implementation over a [`SpiFlash`] region.

use core::future::Future;

use crate::{
    header::{ImageHeader, HEADER_END, HEADER_OFFSET, HEADER_SIZE},
    spi_flash::{SpiFlash, SpiFlashError},
};

/// Errors returned by [`SlotWriter`] implementations
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum StorageError<C> {
    /// The write would run past the end of the slot
    OutOfBounds,
    /// A write or commit was attempted without a successful `begin`
    NotBegun,
    /// The written image failed the commit-time integrity check
    IntegrityCheckFailed,
    /// Errors coming from the underlying flash driver
    Flash(SpiFlashError<C>),
}

impl<C> From<SpiFlashError<C>> for StorageError<C> {
    fn from(value: SpiFlashError<C>) -> Self {
        StorageError::Flash(value)
    }
}

/// Write-side interface to an inactive firmware slot
pub trait SlotWriter {
    type Error: core::fmt::Debug + PartialEq;

    /// Prepare the slot for a fresh image, invalidating previous contents.
    fn begin(&mut self) -> impl Future<Output = Result<(), StorageError<Self::Error>>>;

    /// Append image bytes. Callers may pass arbitrary (unaligned) lengths.
    fn write(
        &mut self,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), StorageError<Self::Error>>>;

    /// Finalize the slot, running the integrity check and marking the image
    /// bootable. [`StorageError::IntegrityCheckFailed`] is distinguishable
    /// from other failures so callers can log a corrupted image as such.
    fn commit(&mut self) -> impl Future<Output = Result<(), StorageError<Self::Error>>>;

    /// Mark the in-progress write invalid. Infallible and idempotent; after
    /// this (or instead of `commit`) the slot is never considered bootable.
    fn discard(&mut self) -> impl Future<Output = ()>;

    /// Logical image bytes accepted so far.
    fn bytes_written(&self) -> usize;
}

/// Slot metadata layout: three one-shot status words ahead of the image.
///
/// Each word is written at most once between erases (NOR bits only clear),
/// so progress is recorded by programming a fresh word at its own offset
/// rather than rewriting one field.
pub const STATUS_IN_PROGRESS_OFFSET: usize = 0;
pub const STATUS_COMPLETE_OFFSET: usize = 4;
pub const STATUS_ABORTED_OFFSET: usize = 8;
/// Image bytes start here (word aligned, one flash word of slack).
pub const DATA_OFFSET: usize = 16;

pub const STATUS_IN_PROGRESS: u32 = 0xB14D_0001;
pub const STATUS_COMPLETE: u32 = 0xB14D_0002;
pub const STATUS_ABORTED: u32 = 0xB14D_0003;

/// Flash write granularity
const WORD: usize = 4;

/// Location of a slot on the flash part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRegion {
    /// Block-aligned start address
    pub base: usize,
    /// Block-aligned size in bytes, including the metadata words
    pub capacity: usize,
}

impl SlotRegion {
    /// Largest image this region can hold
    pub const fn data_capacity(&self) -> usize {
        self.capacity - DATA_OFFSET
    }
}

/// [`SlotWriter`] over a region of NOR flash
///
/// Bytes arrive in arbitrary chunk sizes; writes to the part are kept
/// word-aligned by carrying a partial trailing word between calls and
/// padding the final word with erased (0xFF) bytes at commit time.
pub struct FlashSlotWriter<F> {
    flash: F,
    region: SlotRegion,
    /// Word-aligned bytes already programmed into the data region
    programmed: usize,
    /// Logical image bytes accepted, including any pending tail
    len: usize,
    tail: [u8; WORD],
    tail_len: usize,
    begun: bool,
}

impl<F: SpiFlash> FlashSlotWriter<F> {
    /// # Panics
    ///
    /// Panics if the region cannot hold the metadata words plus at least a
    /// header's worth of image.
    pub fn new(flash: F, region: SlotRegion) -> Self {
        assert!(region.capacity > DATA_OFFSET + HEADER_END);
        Self {
            flash,
            region,
            programmed: 0,
            len: 0,
            tail: [0xFF; WORD],
            tail_len: 0,
            begun: false,
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    fn addr(&self, offset: usize) -> usize {
        self.region.base + offset
    }

    async fn write_status(&mut self, offset: usize, word: u32) -> Result<(), SpiFlashError<F::Error>> {
        let addr = self.addr(offset);
        self.flash.write_from(addr, &word.to_le_bytes()).await
    }

    async fn flush_tail(&mut self) -> Result<(), SpiFlashError<F::Error>> {
        if self.tail_len > 0 {
            let addr = self.addr(DATA_OFFSET + self.programmed);
            let tail = self.tail;
            self.flash.write_from(addr, &tail).await?;
            self.programmed += WORD;
            self.tail = [0xFF; WORD];
            self.tail_len = 0;
        }
        Ok(())
    }
}

impl<F: SpiFlash> SlotWriter for FlashSlotWriter<F> {
    type Error = F::Error;

    async fn begin(&mut self) -> Result<(), StorageError<F::Error>> {
        self.begun = false;
        self.flash
            .erase_range(self.region.base, self.region.capacity)
            .await?;
        self.write_status(STATUS_IN_PROGRESS_OFFSET, STATUS_IN_PROGRESS)
            .await?;
        self.programmed = 0;
        self.len = 0;
        self.tail = [0xFF; WORD];
        self.tail_len = 0;
        self.begun = true;
        Ok(())
    }

    async fn write(&mut self, mut bytes: &[u8]) -> Result<(), StorageError<F::Error>> {
        if !self.begun {
            return Err(StorageError::NotBegun);
        }
        if self.len + bytes.len() > self.region.data_capacity() {
            return Err(StorageError::OutOfBounds);
        }
        self.len += bytes.len();

        // Top up a pending partial word first
        if self.tail_len > 0 {
            let take = (WORD - self.tail_len).min(bytes.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&bytes[..take]);
            self.tail_len += take;
            bytes = &bytes[take..];
            if self.tail_len == WORD {
                self.flush_tail().await?;
            }
        }

        // Aligned bulk
        let aligned = bytes.len() & !(WORD - 1);
        if aligned > 0 {
            let addr = self.addr(DATA_OFFSET + self.programmed);
            self.flash.write_from(addr, &bytes[..aligned]).await?;
            self.programmed += aligned;
        }

        // Keep trailing bytes for the next call
        let rest = &bytes[aligned..];
        if !rest.is_empty() {
            self.tail[..rest.len()].copy_from_slice(rest);
            self.tail_len = rest.len();
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError<F::Error>> {
        if !self.begun {
            return Err(StorageError::NotBegun);
        }
        self.flush_tail().await?;

        // The image must at least cover the header window
        if self.len < HEADER_END {
            return Err(StorageError::IntegrityCheckFailed);
        }
        let mut raw = [0_u8; HEADER_SIZE];
        let addr = self.addr(DATA_OFFSET + HEADER_OFFSET);
        self.flash.read_to(addr, &mut raw).await?;
        let Some((header, _)) = ImageHeader::take_from_bytes(&raw) else {
            return Err(StorageError::IntegrityCheckFailed);
        };
        if header.image_len != 0 && header.image_len as usize != self.len {
            return Err(StorageError::IntegrityCheckFailed);
        }

        self.write_status(STATUS_COMPLETE_OFFSET, STATUS_COMPLETE)
            .await?;
        self.begun = false;
        Ok(())
    }

    async fn discard(&mut self) {
        if !self.begun {
            return;
        }
        // Best effort: without the complete word the slot is already
        // unbootable, the aborted word just records why.
        let addr = self.addr(STATUS_ABORTED_OFFSET);
        let _ = self.flash.write_from(addr, &STATUS_ABORTED.to_le_bytes()).await;
        self.tail_len = 0;
        self.begun = false;
    }

    fn bytes_written(&self) -> usize {
        self.len
    }
}
