//! Streaming over-the-air firmware update engine
//!
//! This library contains the update session state machine used to pull a
//! firmware image from a network source, optionally decrypt it on the fly,
//! validate its header before the transfer completes, and write it into an
//! inactive flash slot. The transport, flash driver, cipher, and executor are
//! all consumed through narrow traits so the engine can run on any target
//! (including the host, for testing).
//!
//! Known limitation: a source that stalls (returns zero-length reads forever)
//! without signalling end-of-stream keeps the session alive indefinitely.
//! There is no built-in stall timeout; wrap the [`source::ImageSource`]
//! implementation if one is needed.
#![no_std]

pub mod header;
pub mod power;
pub mod request;
pub mod session;
pub mod source;
pub mod spi_flash;
pub mod storage;
pub mod supervisor;
pub mod transform;
pub mod validate;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
