//! Serial EEPROM access
//!
//! The optional 93C46-style EEPROM holds the station address: a 0xA5
//! signature at location 0 followed by the six address bytes. The chip
//! loads it into ADDRH/ADDRL after reset or on a RELOAD command.
//!
//! All access goes through the E2P_CMD/E2P_DATA pair. An [`EepromSession`]
//! borrows the EEDIO/EECLK pins from the GPIO block for its lifetime.
//! Sessions are not serialized against each other; they are control-path
//! operations the host issues one at a time.

use super::Controller;
use super::bus::RegisterBus;
use super::config::DebugFlags;
use super::mac::RegisterError;
use super::platform::Platform;
use super::regs::*;
use crate::drivers::net::NetworkError;
use crate::net::ethernet::MacAddress;
use log::{debug, warn};

/// 10 µs polls of E2P_CMD.EPC_BUSY per command
const EEPROM_POLL_LIMIT: u32 = 100_000;

/// Location 0 value that marks a programmed EEPROM
pub const EEPROM_SIGNATURE: u8 = 0xA5;

/// Bytes of EEPROM that carry configuration (signature and address)
pub const EEPROM_CONFIG_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromCommand {
    Read,
    DisableWrites,
    EnableWrites,
    Write,
    WriteAll,
    Erase,
    EraseAll,
    Reload,
}

impl EepromCommand {
    fn code(self) -> u32 {
        match self {
            EepromCommand::Read => E2P_CMD_EPC_CMD_READ,
            EepromCommand::DisableWrites => E2P_CMD_EPC_CMD_EWDS,
            EepromCommand::EnableWrites => E2P_CMD_EPC_CMD_EWEN,
            EepromCommand::Write => E2P_CMD_EPC_CMD_WRITE,
            EepromCommand::WriteAll => E2P_CMD_EPC_CMD_WRAL,
            EepromCommand::Erase => E2P_CMD_EPC_CMD_ERASE,
            EepromCommand::EraseAll => E2P_CMD_EPC_CMD_ERAL,
            EepromCommand::Reload => E2P_CMD_EPC_CMD_RELOAD,
        }
    }
}

/// EEPROM pins handed to the EEPROM controller until dropped
pub struct EepromSession<'a, B: RegisterBus, P: Platform> {
    controller: &'a Controller<B, P>,
}

impl<'a, B: RegisterBus, P: Platform> EepromSession<'a, B, P> {
    fn open(controller: &'a Controller<B, P>) -> Self {
        let lan = &controller.lan;
        if controller.config.debug.contains(DebugFlags::GPIO) {
            let gpio_cfg = controller.resources.lock().gpio_cfg;
            lan.write(GPIO_CFG, gpio_cfg & !GPIO_CFG_EEPROM_PINS);
        } else {
            lan.clear_bits(GPIO_CFG, GPIO_CFG_EEPROM_PINS);
        }
        controller.platform.delay_us(100);
        Self { controller }
    }

    pub fn is_busy(&self) -> bool {
        self.controller.lan.read(E2P_CMD) & E2P_CMD_EPC_BUSY != 0
    }

    pub fn mac_address_loaded(&self) -> bool {
        self.controller.lan.read(E2P_CMD) & E2P_CMD_MAC_ADDR_LOADED != 0
    }

    /// Issue one command and wait for EPC_BUSY to clear
    pub fn command(&self, command: EepromCommand, address: u8) -> Result<(), NetworkError> {
        let lan = &self.controller.lan;
        let status = lan.read(E2P_CMD);
        if status & E2P_CMD_EPC_BUSY != 0 {
            warn!("[EEPROM] {:?}: busy at entry, E2P_CMD=0x{:08X}", command, status);
            return Err(NetworkError::EepromBusy);
        }

        lan.write(E2P_CMD, E2P_CMD_EPC_BUSY | command.code() | address as u32);
        for _ in 0..EEPROM_POLL_LIMIT {
            if !self.is_busy() {
                return Ok(());
            }
            self.controller.platform.delay_us(10);
        }
        warn!("[EEPROM] {:?} at 0x{:02X} timed out", command, address);
        Err(NetworkError::EepromTimeout)
    }

    pub fn read(&self, address: u8) -> Result<u8, NetworkError> {
        self.command(EepromCommand::Read, address)?;
        let lan = &self.controller.lan;
        if lan.read(E2P_CMD) & E2P_CMD_EPC_TIMEOUT != 0 {
            warn!("[EEPROM] read 0x{:02X}: no EEPROM responded", address);
            return Err(NetworkError::EepromTimeout);
        }
        Ok((lan.read(E2P_DATA) & E2P_DATA_EEPROM_DATA) as u8)
    }

    /// Write one location; writes must already be enabled
    pub fn write(&self, address: u8, data: u8) -> Result<(), NetworkError> {
        if self.is_busy() {
            warn!("[EEPROM] write 0x{:02X}: busy at entry", address);
            return Err(NetworkError::EepromBusy);
        }
        self.controller.lan.write(E2P_DATA, data as u32);
        self.command(EepromCommand::Write, address)
    }

    pub fn enable_writes(&self) -> Result<(), NetworkError> {
        self.command(EepromCommand::EnableWrites, 0)
    }

    pub fn disable_writes(&self) -> Result<(), NetworkError> {
        self.command(EepromCommand::DisableWrites, 0)
    }

    pub fn erase_all(&self) -> Result<(), NetworkError> {
        self.command(EepromCommand::EraseAll, 0)
    }

    /// Reload ADDRH/ADDRL from the EEPROM; true if an address was loaded
    pub fn reload(&self) -> Result<bool, NetworkError> {
        self.command(EepromCommand::Reload, 0)?;
        Ok(self.mac_address_loaded())
    }
}

impl<B: RegisterBus, P: Platform> Drop for EepromSession<'_, B, P> {
    fn drop(&mut self) {
        if self.controller.config.debug.contains(DebugFlags::GPIO) {
            let gpio_cfg = self.controller.resources.lock().gpio_cfg;
            self.controller.lan.write(GPIO_CFG, gpio_cfg);
        }
    }
}

impl<B: RegisterBus, P: Platform> Controller<B, P> {
    pub fn eeprom(&self) -> EepromSession<'_, B, P> {
        EepromSession::open(self)
    }

    /// Signature and station address bytes as stored
    pub fn dump_eeprom(&self) -> Result<[u8; EEPROM_CONFIG_LEN + 1], NetworkError> {
        let session = self.eeprom();
        let mut contents = [0u8; EEPROM_CONFIG_LEN + 1];
        for (address, byte) in contents.iter_mut().enumerate() {
            *byte = session.read(address as u8)?;
        }
        Ok(contents)
    }

    /// Program `mac` into the EEPROM and check the chip reloads it
    pub fn save_mac_address(&self, mac: MacAddress) -> Result<(), NetworkError> {
        let (addrh, addrl) = mac.to_registers();
        let bytes = mac.as_bytes();
        let session = self.eeprom();

        session.enable_writes()?;
        session.erase_all()?;

        let image = [
            EEPROM_SIGNATURE,
            bytes[0],
            bytes[1],
            bytes[2],
            bytes[3],
            bytes[4],
            bytes[5],
        ];
        for (address, &data) in image.iter().enumerate() {
            // Generation 0 drops write enable after every write
            if self.chip.generation() == 0 {
                session.enable_writes()?;
            }
            session.write(address as u8, data)?;
        }
        session.disable_writes()?;

        if !session.reload()? {
            warn!("[EEPROM] address not loaded after save");
            return Err(NetworkError::HardwareError);
        }
        drop(session);

        let held = self.lan.acquire_mac_phy();
        let read = |index| {
            self.lan
                .mac_read(&held, index)
                .unwrap_or_else(RegisterError::mac_sentinel)
        };
        let stored = (read(ADDRH), read(ADDRL));
        if stored != (addrh, addrl) {
            warn!(
                "[EEPROM] verify failed: ADDRH 0x{:08X} ADDRL 0x{:08X}",
                stored.0, stored.1
            );
            return Err(NetworkError::HardwareError);
        }
        drop(held);

        self.resources.lock().mac = mac;
        debug!("[EEPROM] saved {}", mac);
        Ok(())
    }

    /// Reload the station address from the EEPROM
    ///
    /// `None` when the chip reports no address was loaded (blank or absent
    /// EEPROM); ADDRH/ADDRL are then left as the EEPROM controller left them.
    pub fn reload_mac_address(&self) -> Result<Option<MacAddress>, NetworkError> {
        if !self.eeprom().reload()? {
            warn!("[EEPROM] no address loaded");
            return Ok(None);
        }

        let held = self.lan.acquire_mac_phy();
        let addrh = self
            .lan
            .mac_read(&held, ADDRH)
            .map_err(|_| NetworkError::HardwareError)?;
        let addrl = self
            .lan
            .mac_read(&held, ADDRL)
            .map_err(|_| NetworkError::HardwareError)?;
        drop(held);

        let mac = MacAddress::from_registers(addrh, addrl);
        self.resources.lock().mac = mac;
        Ok(Some(mac))
    }
}
