//! SPI flash abstraction
//!
//! The slot writer drives the target flash part through this trait. It
//! models a standard NOR part: block-granular erase, byte-granular reads,
//! and writes that may only program erased bytes.

use core::future::Future;

/// Errors returned by [`SpiFlash`] implementations
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum SpiFlashError<C> {
    /// An unaligned access was attempted
    UnalignedAccess,
    /// Access outside the bounds of the flash chip was attempted
    OutOfBounds,
    /// An unspecified, fatal, hardware-level error occurred
    HardwareFailure,
    /// Error types specific to the implementor
    Custom(C),
    /// An internal logic error
    LogicError,
}

impl<C> From<C> for SpiFlashError<C> {
    fn from(value: C) -> Self {
        SpiFlashError::Custom(value)
    }
}

/// NOR flash driver trait
pub trait SpiFlash {
    type Error: core::fmt::Debug + PartialEq;

    /// The total size of the flash device in bytes
    fn total_size(&self) -> usize;
    /// The smallest possible erase size of the flash device
    fn block_size(&self) -> usize;

    /// Erase a single block, starting at `start_addr`.
    fn erase_block(
        &mut self,
        start_addr: usize,
    ) -> impl Future<Output = Result<(), SpiFlashError<Self::Error>>>;

    /// Read FROM the flash TO the provided buffer.
    ///
    /// Starts at `start_addr`, and `buf.len()` bytes are copied.
    fn read_to(
        &mut self,
        start_addr: usize,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(), SpiFlashError<Self::Error>>>;

    /// Write TO the flash FROM the provided buffer
    ///
    /// The entire range `[start_addr..][..buf.len()]` MUST have been erased.
    fn write_from(
        &mut self,
        start_addr: usize,
        buf: &[u8],
    ) -> impl Future<Output = Result<(), SpiFlashError<Self::Error>>>;

    /// Erase `len` bytes starting at `start_addr`, block by block.
    ///
    /// Both `start_addr` and `len` must be multiples of
    /// [`block_size`](Self::block_size).
    fn erase_range(
        &mut self,
        start_addr: usize,
        len: usize,
    ) -> impl Future<Output = Result<(), SpiFlashError<Self::Error>>> {
        async move {
            let block = self.block_size();
            if start_addr % block != 0 || len % block != 0 {
                return Err(SpiFlashError::UnalignedAccess);
            }
            let mut cur = start_addr;
            while cur < start_addr + len {
                self.erase_block(cur).await?;
                cur += block;
            }
            Ok(())
        }
    }
}

impl<T: SpiFlash> SpiFlash for &mut T {
    type Error = T::Error;

    fn total_size(&self) -> usize {
        (**self).total_size()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    async fn erase_block(&mut self, start_addr: usize) -> Result<(), SpiFlashError<Self::Error>> {
        (**self).erase_block(start_addr).await
    }

    async fn read_to(
        &mut self,
        start_addr: usize,
        buf: &mut [u8],
    ) -> Result<(), SpiFlashError<Self::Error>> {
        (**self).read_to(start_addr, buf).await
    }

    async fn write_from(
        &mut self,
        start_addr: usize,
        buf: &[u8],
    ) -> Result<(), SpiFlashError<Self::Error>> {
        (**self).write_from(start_addr, buf).await
    }
}
