//! MAC and PHY register access
//!
//! The MAC's registers are not memory mapped. Each access goes through the
//! MAC_CSR_CMD/MAC_CSR_DATA pair, and the PHY sits one level further down
//! behind the MAC's MII_ACC/MII_DATA pair:
//!
//! ```text
//! direct:   MAC_CSR_CMD  <- BUSY | R_NOT_W | index     poll BUSY, read MAC_CSR_DATA
//! MAC:      MII_ACC      <- phy << 11 | reg << 6 | BUSY poll BUSY, read MII_DATA
//! ```
//!
//! Both protocols are multi-step and must not interleave, so every access
//! requires a held [`MacPhyGuard`]. The guard is passed explicitly: a
//! function that takes `&MacPhyGuard` can only be called by code that
//! already holds the lock, and a function that acquires it cannot be called
//! with it held without deadlocking in a way the borrow checker makes
//! obvious. In debug builds each access also checks the guard's token.
//!
//! The state that must change atomically with MAC/PHY registers (receiver
//! reference count, pending multicast filter, link state) lives inside the
//! same lock.

use super::bus::{Lan, RegisterBus};
use super::multicast::FilterSettings;
use super::phy::{LinkModes, LinkState};
use super::regs::*;
use crate::drivers::net::NetworkError;
use crate::sync::VerifiableGuard;
use core::fmt;
use log::warn;

/// Polls of MAC_CSR_CMD before a MAC access is given up on
const MAC_POLL_LIMIT: u32 = 40;

/// Polls of MII_ACC before a PHY access is given up on
const MII_POLL_LIMIT: u32 = 100;

/// Everything guarded by the MAC/PHY lock besides the registers themselves
#[derive(Debug)]
pub struct MacPhyState {
    /// Outstanding `receiver_off` requests; RXEN is set only at zero
    pub(crate) rx_off_count: u32,
    /// Filter waiting for the receiver to go idle (generation 0 and 1)
    pub(crate) pending_filter: Option<FilterSettings>,
    /// Current speed/duplex as a single `LinkModes` speed bit, empty when down
    pub(crate) link_speed: LinkModes,
    /// What the last link evaluation found (speeds, pause, autoneg)
    pub(crate) link_settings: LinkModes,
    pub(crate) link_state: LinkState,
    /// MII address of the PHY in use
    pub(crate) phy_address: u8,
    /// Last value written to PHY_ANEG_ADV
    pub(crate) last_adv: u16,
    /// Advertisement in force when autonegotiation was last restarted
    pub(crate) last_adv_at_restart: u16,
    pub(crate) remote_fault_count: u32,
}

impl MacPhyState {
    pub const fn new() -> Self {
        Self {
            rx_off_count: 0,
            pending_filter: None,
            link_speed: LinkModes::empty(),
            link_settings: LinkModes::empty(),
            link_state: LinkState::Down,
            phy_address: INTERNAL_PHY_ADDRESS,
            last_adv: 0,
            last_adv_at_restart: 0,
            remote_fault_count: 0,
        }
    }
}

/// Proof of holding the MAC/PHY lock
pub type MacPhyGuard<'a> = VerifiableGuard<'a, MacPhyState>;

/// Why an indirect access did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// A previous command was still running when this one was issued
    BusyAtEntry,
    /// The busy bit never cleared
    Timeout,
}

impl From<RegisterError> for NetworkError {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::BusyAtEntry => NetworkError::HardwareError,
            RegisterError::Timeout => NetworkError::Timeout,
        }
    }
}

impl RegisterError {
    /// Value a failed MII read has always reported
    ///
    /// PHY scans depend on it: a timeout reads as an absent PHY.
    pub fn mii_sentinel(self) -> u16 {
        match self {
            RegisterError::BusyAtEntry => 0,
            RegisterError::Timeout => 0xFFFF,
        }
    }

    /// Value a failed MAC read has always reported
    pub fn mac_sentinel(self) -> u32 {
        0xFFFF_FFFF
    }
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::BusyAtEntry => write!(f, "busy at entry"),
            RegisterError::Timeout => write!(f, "timed out"),
        }
    }
}

impl<B: RegisterBus> Lan<B> {
    // ========================================================================
    // Lock
    // ========================================================================

    pub fn acquire_mac_phy(&self) -> MacPhyGuard<'_> {
        self.mac_phy.acquire()
    }

    #[inline]
    fn assert_holder(&self, held: &MacPhyGuard<'_>) {
        debug_assert!(
            core::ptr::eq(held.lock(), &self.mac_phy) && self.mac_phy.check(held.token()),
            "MAC/PHY access without holding the MAC/PHY lock"
        );
    }

    // ========================================================================
    // MAC CSR
    // ========================================================================

    fn mac_wait(&self) -> Result<(), RegisterError> {
        // Flush the command write before polling
        self.read(BYTE_TEST);
        for _ in 0..MAC_POLL_LIMIT {
            if self.read(MAC_CSR_CMD) & MAC_CSR_CMD_CSR_BUSY == 0 {
                return Ok(());
            }
        }
        Err(RegisterError::Timeout)
    }

    pub fn mac_read(&self, held: &MacPhyGuard<'_>, index: u32) -> Result<u32, RegisterError> {
        self.assert_holder(held);

        if self.read(MAC_CSR_CMD) & MAC_CSR_CMD_CSR_BUSY != 0 {
            warn!("[LAN911X] MAC read 0x{:02X}: CSR busy at entry", index);
            return Err(RegisterError::BusyAtEntry);
        }

        self.write(
            MAC_CSR_CMD,
            (index & MAC_CSR_CMD_CSR_ADDR) | MAC_CSR_CMD_CSR_BUSY | MAC_CSR_CMD_R_NOT_W,
        );
        if let Err(e) = self.mac_wait() {
            warn!("[LAN911X] MAC read 0x{:02X} {}", index, e);
            return Err(e);
        }
        Ok(self.read(MAC_CSR_DATA))
    }

    pub fn mac_write(
        &self,
        held: &MacPhyGuard<'_>,
        index: u32,
        value: u32,
    ) -> Result<(), RegisterError> {
        self.assert_holder(held);

        if self.read(MAC_CSR_CMD) & MAC_CSR_CMD_CSR_BUSY != 0 {
            warn!("[LAN911X] MAC write 0x{:02X}: CSR busy at entry", index);
            return Err(RegisterError::BusyAtEntry);
        }

        self.write(MAC_CSR_DATA, value);
        self.write(MAC_CSR_CMD, (index & MAC_CSR_CMD_CSR_ADDR) | MAC_CSR_CMD_CSR_BUSY);
        if let Err(e) = self.mac_wait() {
            warn!("[LAN911X] MAC write 0x{:02X} {}", index, e);
            return Err(e);
        }
        Ok(())
    }

    /// Read-modify-write of a MAC register; returns the value written
    ///
    /// Nothing is written if the read fails.
    pub fn mac_modify(
        &self,
        held: &MacPhyGuard<'_>,
        index: u32,
        clear: u32,
        set: u32,
    ) -> Result<u32, RegisterError> {
        let value = (self.mac_read(held, index)? & !clear) | set;
        self.mac_write(held, index, value)?;
        Ok(value)
    }

    // ========================================================================
    // MII (PHY) Access
    // ========================================================================

    fn mii_command(address: u8, index: u32) -> u32 {
        (((address as u32) & 0x1F) << MII_ACC_PHY_ADDR_SHIFT)
            | ((index & 0x1F) << MII_ACC_MIIRINDA_SHIFT)
            | MII_ACC_MII_BUSY
    }

    fn mii_wait(&self, held: &MacPhyGuard<'_>) -> Result<(), RegisterError> {
        for _ in 0..MII_POLL_LIMIT {
            if self.mac_read(held, MII_ACC)? & MII_ACC_MII_BUSY == 0 {
                return Ok(());
            }
        }
        Err(RegisterError::Timeout)
    }

    /// Read PHY register `index` of the PHY at MII `address`
    pub fn phy_read_at(
        &self,
        held: &MacPhyGuard<'_>,
        address: u8,
        index: u32,
    ) -> Result<u16, RegisterError> {
        if self.mac_read(held, MII_ACC)? & MII_ACC_MII_BUSY != 0 {
            warn!("[PHY] read {}: MII busy at entry", index);
            return Err(RegisterError::BusyAtEntry);
        }

        self.mac_write(held, MII_ACC, Self::mii_command(address, index))?;
        if let Err(e) = self.mii_wait(held) {
            warn!("[PHY] read {} at {} {}", index, address, e);
            return Err(e);
        }
        Ok((self.mac_read(held, MII_DATA)? & 0xFFFF) as u16)
    }

    /// Read a register of the PHY in use
    pub fn phy_read(&self, held: &MacPhyGuard<'_>, index: u32) -> Result<u16, RegisterError> {
        self.phy_read_at(held, held.phy_address, index)
    }

    /// Write a register of the PHY in use
    ///
    /// Writes to the advertisement register and autoneg restarts are
    /// remembered, so pause resolution knows what was actually negotiated.
    pub fn phy_write(
        &self,
        held: &mut MacPhyGuard<'_>,
        index: u32,
        value: u16,
    ) -> Result<(), RegisterError> {
        let restart = PHY_BCR_AUTO_NEG_ENABLE | PHY_BCR_RESTART_AUTO_NEG;
        if index == PHY_BCR && value & restart == restart {
            held.last_adv_at_restart = held.last_adv;
        } else if index == PHY_ANEG_ADV {
            held.last_adv = value;
        }

        if self.mac_read(held, MII_ACC)? & MII_ACC_MII_BUSY != 0 {
            warn!("[PHY] write {}: MII busy at entry", index);
            return Err(RegisterError::BusyAtEntry);
        }

        self.mac_write(held, MII_DATA, value as u32)?;
        let command = Self::mii_command(held.phy_address, index) | MII_ACC_MII_WRITE;
        self.mac_write(held, MII_ACC, command)?;
        if let Err(e) = self.mii_wait(held) {
            warn!("[PHY] write {} {}", index, e);
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // Receiver Enable
    // ========================================================================
    //
    // Link management, multicast updates and overrun recovery all turn the
    // receiver off independently. The count makes sure it only comes back
    // on after the last of them is done.

    /// Take one receiver-off reference, clearing MAC_CR.RXEN on the first
    ///
    /// The count only moves once MAC_CR has been written.
    pub fn receiver_off(&self) -> Result<(), RegisterError> {
        let mut held = self.acquire_mac_phy();
        self.receiver_off_held(&mut held)
    }

    pub fn receiver_off_held(&self, held: &mut MacPhyGuard<'_>) -> Result<(), RegisterError> {
        if held.rx_off_count == 0 {
            let mac_cr = self.mac_read(held, MAC_CR)?;
            if mac_cr & MAC_CR_RXEN == 0 {
                warn!("[LAN911X] receiver_off: receiver already off");
            }
            self.mac_write(held, MAC_CR, mac_cr & !MAC_CR_RXEN)?;
        }
        held.rx_off_count += 1;
        Ok(())
    }

    /// Drop one receiver-off reference, setting MAC_CR.RXEN on the last
    pub fn receiver_on(&self) -> Result<(), RegisterError> {
        let mut held = self.acquire_mac_phy();
        self.receiver_on_held(&mut held)
    }

    pub fn receiver_on_held(&self, held: &mut MacPhyGuard<'_>) -> Result<(), RegisterError> {
        if held.rx_off_count == 0 {
            warn!("[LAN911X] receiver_on without matching receiver_off");
            return Ok(());
        }

        if held.rx_off_count == 1 {
            let mac_cr = self.mac_read(held, MAC_CR)?;
            if mac_cr & MAC_CR_RXEN != 0 {
                warn!("[LAN911X] receiver_on: receiver already on");
            }
            self.mac_write(held, MAC_CR, mac_cr | MAC_CR_RXEN)?;
        }
        held.rx_off_count -= 1;
        Ok(())
    }
}
