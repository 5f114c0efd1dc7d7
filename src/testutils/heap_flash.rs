//! A mocked SPI flash simulator intended for testing
//!
//! Implements the [`SpiFlash`] trait for host testing of the slot writer.
//! It mimics the read, write, erase behaviors of a typical SPI NOR flash
//! part while checking invariants, such as multiple writes to the same byte
//! without an erase (which would corrupt values on real hardware).

extern crate std;
use std::prelude::rust_2021::*;
use std::vec;

use crate::spi_flash::{SpiFlash, SpiFlashError};

/// A heap allocated SPI flash simulator
pub struct Flash {
    data: Vec<u8>,
    written: Vec<bool>,
    block_size: usize,
}

impl Flash {
    /// Create a new simulated, blank flash part divided into blocks of
    /// `block_size`.
    ///
    /// # Panics
    /// Panics if `total_size` is not evenly divisible by `block_size`.
    #[must_use]
    pub fn new(block_size: usize, total_size: usize) -> Self {
        assert_eq!(total_size % block_size, 0);
        Flash {
            data: vec![0xFF; total_size],
            written: vec![false; total_size],
            block_size,
        }
    }

    /// Raw view of a flash range, for asserting on what was programmed.
    ///
    /// # Panics
    /// Panics if the range runs off the end of the part.
    #[must_use]
    pub fn contents(&self, start_addr: usize, len: usize) -> &[u8] {
        &self.data[start_addr..start_addr + len]
    }

    fn check_bounds(&self, start_addr: usize, len: usize) -> Result<(), SpiFlashError<Error>> {
        if start_addr >= self.data.len() || start_addr + len > self.data.len() {
            return Err(SpiFlashError::OutOfBounds);
        }
        Ok(())
    }
}

/// The associated error type
///
/// This needs to exist to fulfill the [`SpiFlash`] trait's associated type,
/// however it is empty as [`Flash`] will always panic if an invariant is
/// violated for testing purposes.
#[derive(Debug, PartialEq)]
pub enum Error {}

impl SpiFlash for Flash {
    type Error = Error;

    fn total_size(&self) -> usize {
        self.data.len()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    async fn erase_block(&mut self, start_addr: usize) -> Result<(), SpiFlashError<Error>> {
        // Erases must be block-aligned
        if (start_addr % self.block_size) != 0 {
            return Err(SpiFlashError::UnalignedAccess);
        }
        self.check_bounds(start_addr, self.block_size)?;
        self.data[start_addr..start_addr + self.block_size].fill(0xFF);
        self.written[start_addr..start_addr + self.block_size].fill(false);
        Ok(())
    }

    async fn read_to(
        &mut self,
        start_addr: usize,
        buf: &mut [u8],
    ) -> Result<(), SpiFlashError<Error>> {
        self.check_bounds(start_addr, buf.len())?;
        buf.copy_from_slice(&self.data[start_addr..start_addr + buf.len()]);
        Ok(())
    }

    async fn write_from(
        &mut self,
        start_addr: usize,
        buf: &[u8],
    ) -> Result<(), SpiFlashError<Error>> {
        self.check_bounds(start_addr, buf.len())?;

        // Each byte may only be written once between erases. Technically a
        // second write would act as a mask (bits can only clear), but we
        // take the stricter interpretation and panic, ignoring 0xFF writes.
        let dst = &mut self.data[start_addr..start_addr + buf.len()];
        let wrs = &mut self.written[start_addr..start_addr + buf.len()];
        for ((dat, dst), wr) in buf.iter().zip(dst).zip(wrs) {
            if *dat != 0xFF {
                assert!(!*wr);
                *wr = true;
            }
            *dst = *dat;
        }
        Ok(())
    }
}
