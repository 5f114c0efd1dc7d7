//! Device restart primitive

use core::future::Future;

/// Hook for rebooting into a freshly committed image.
///
/// A production implementation resets the SoC and never returns; the
/// signature allows returning only so host test doubles can observe the
/// call.
pub trait DevicePower {
    fn restart(&mut self) -> impl Future<Output = ()>;
}
