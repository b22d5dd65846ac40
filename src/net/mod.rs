//! Host-side networking types
//!
//! Frame buffers and station addresses shared by the drivers, plus the
//! smoltcp device adapter.

pub mod device;
pub mod ethernet;
pub mod skbuff;

pub use ethernet::MacAddress;
pub use skbuff::{SkBuff, SkBuffError};
