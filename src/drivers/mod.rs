//! Device drivers subsystem
//!
//! Organized by device class:
//! - `net`: Network device drivers

pub mod net;
