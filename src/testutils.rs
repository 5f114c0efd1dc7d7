//! Host-side test doubles
//!
//! Everything in here is heap allocated and intended for tests running on
//! the host; nothing is suitable for an embedded target.

pub mod heap_flash;
pub mod session_support;
