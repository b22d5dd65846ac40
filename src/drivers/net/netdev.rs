//! Network Device Abstraction
//!
//! This module provides a trait for interrupt-driven Ethernet controllers.
//! Received frames are pushed up to the host's frame queue by the driver
//! itself; the trait only covers what the host initiates.
//!
//! ## Design Philosophy
//!
//! - **Shared access**: every method takes `&self`. Controllers are reached
//!   from the interrupt handler, deferred workers and the host at the same
//!   time, so they guard their own state internally.
//! - **Owned frames**: `transmit()` takes the `SkBuff` by value. A DMA
//!   transfer may still be reading it after the call returns.
//! - **Result types**: only bring-up and admission errors surface here.
//!   Data-path failures turn into statistics.
//!
//! ## Current Implementations
//!
//! - `lan911x::Controller` - SMSC LAN9118 family MAC/PHY
//!
//! ## Example Usage
//!
//! ```ignore
//! let netdev = Controller::new(bus, platform, ControllerConfig::new())?;
//! if netdev.is_present() {
//!     netdev.open()?;
//!     let frame = SkBuff::from_slice(&[0xFF; 64])?;
//!     netdev.transmit(frame)?;
//! }
//! ```

use crate::net::ethernet::MacAddress;
use crate::net::skbuff::SkBuff;
use core::fmt;

/// Errors that can occur during network device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Hardware is not present or not responding
    HardwareNotPresent,

    /// ID_REV reports a part this driver does not drive
    UnsupportedChip(u32),

    /// Device is not initialized
    NotInitialized,

    /// Transmit path is busy (try again later)
    TxBufferFull,

    /// Frame is too large for device
    FrameTooLarge,

    /// Frame is empty
    FrameTooSmall,

    /// Hardware error during operation
    HardwareError,

    /// Timeout waiting for operation to complete
    Timeout,

    /// Invalid configuration or parameter
    InvalidConfiguration,

    /// Requested DMA channel could not be reserved
    DmaChannelUnavailable,

    /// Interrupt handler could not be attached
    IrqAttachFailed,

    /// Software interrupt never reached the handler during bring-up
    SelfTestFailed,

    /// EEPROM controller busy when a command was issued
    EepromBusy,

    /// EEPROM command did not complete
    EepromTimeout,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::HardwareNotPresent => write!(f, "Hardware not present"),
            NetworkError::UnsupportedChip(id) => write!(f, "Unsupported chip (ID_REV 0x{:08X})", id),
            NetworkError::NotInitialized => write!(f, "Device not initialized"),
            NetworkError::TxBufferFull => write!(f, "Transmit buffer full"),
            NetworkError::FrameTooLarge => write!(f, "Frame too large"),
            NetworkError::FrameTooSmall => write!(f, "Frame too small"),
            NetworkError::HardwareError => write!(f, "Hardware error"),
            NetworkError::Timeout => write!(f, "Operation timeout"),
            NetworkError::InvalidConfiguration => write!(f, "Invalid configuration"),
            NetworkError::DmaChannelUnavailable => write!(f, "DMA channel unavailable"),
            NetworkError::IrqAttachFailed => write!(f, "Failed to attach interrupt handler"),
            NetworkError::SelfTestFailed => write!(f, "Interrupt self-test failed"),
            NetworkError::EepromBusy => write!(f, "EEPROM busy"),
            NetworkError::EepromTimeout => write!(f, "EEPROM timeout"),
        }
    }
}

/// Network device abstraction trait
///
/// # Thread Safety
///
/// Implementations must tolerate calls from any context, including while
/// their own interrupt handler runs on another core.
pub trait NetworkDevice {
    /// Check if the hardware is present and accessible
    ///
    /// Must not touch anything beyond identification registers.
    fn is_present(&self) -> bool;

    /// Bring the device up
    ///
    /// Resets the chip, attaches the interrupt handler, configures the PHY
    /// and enables both data paths.
    ///
    /// # Errors
    ///
    /// - `HardwareNotPresent` - Device not detected
    /// - `Timeout` - Reset or PHY configuration timed out
    /// - `DmaChannelUnavailable`, `IrqAttachFailed`, `SelfTestFailed` -
    ///   platform resources could not be set up
    #[must_use = "open() failure must be handled - device may not be operational"]
    fn open(&self) -> Result<(), NetworkError>;

    /// Take the device down; safe to call on a device that never opened
    fn stop(&self);

    /// Queue an Ethernet frame for transmission
    ///
    /// Does not wait for the frame to leave the wire. Completion is
    /// reported through the device's statistics.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` - Must call `open()` first
    /// - `FrameTooSmall` / `FrameTooLarge` - Length outside what the FIFO accepts
    /// - `TxBufferFull` - A previous frame still owns the transmit path
    #[must_use = "transmit() failure must be handled - frame may not have been sent"]
    fn transmit(&self, frame: SkBuff) -> Result<(), NetworkError>;

    /// Whether transmit admission is currently paused
    fn tx_queue_stopped(&self) -> bool {
        false
    }

    /// Get the device's station address
    fn mac_address(&self) -> MacAddress;

    /// Get link status (optional, returns false by default)
    fn link_up(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", NetworkError::UnsupportedChip(0x0116_0000)),
            "Unsupported chip (ID_REV 0x01160000)"
        );
        assert_eq!(format!("{}", NetworkError::SelfTestFailed), "Interrupt self-test failed");
    }
}
