//! LAN911x Ethernet controller driver
//!
//! Packet engine for the SMSC LAN9118 family: register access, the
//! interrupt-driven Rx/Tx paths, adaptive receive flow control, the GPT
//! timer multiplexer and PHY link management. Board services (delays,
//! DMA, interrupt attach, the host frame queue) come in through
//! [`drivers::net::ethernet::smsc::lan911x::platform::Platform`].
//!
//! The crate is `no_std` with `alloc`; host unit tests run against a
//! simulated register file.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod net;
pub mod sync;
