//! SMSC LAN911x Ethernet Controller Driver
//!
//! This driver supports the SMSC (Microchip) LAN9118 family of single-chip
//! MAC/PHY controllers: LAN9118/9117/9116/9115/9112 and the LAN921x
//! follow-ons. The chip sits on a 32-bit asynchronous bus and exposes its
//! frame FIFOs through a small block of direct registers; the MAC and the
//! PHY are reached indirectly behind it.
//!
//! `Controller` ties the engines together:
//!
//! ```text
//!                    ┌────────────── Controller ──────────────┐
//!  handle_interrupt ─┤ SW ─▶ multicast   GPT ─▶ GptScheduler  │
//!                    │ TDFA ─▶ tx        RXSTOP ─▶ multicast   │
//!                    │ RSFL/RXE/RDFx ─▶ rx (PIO or DMA)        │
//!                    └─────────┬──────────────────┬────────────┘
//!                          Lan (direct)      MacPhyGuard (MAC/MII)
//! ```
//!
//! # Implementation Notes
//!
//! - Every context (interrupt handler, deferred Rx worker, host calls,
//!   DMA and link-timer completions) works on `&Controller`; state is
//!   split over several IRQ-saving locks instead of one big one.
//! - The MAC/PHY lock is the only one held across register sequences.
//!   Rx, Tx, statistics and the GPT slot table each have their own.
//! - Data-path failures never surface as errors. They are logged and
//!   counted in [`Statistics`].
//! - Chip generation decides the workarounds (see `chip.rs`).
//!
//! # References
//!
//! - SMSC LAN9118 datasheet rev 1.5 and application note AN 12.12
//! - Linux: drivers/net/ethernet/smsc/smsc911x.c

pub mod bus;
pub mod chip;
pub mod config;
pub mod eeprom;
pub mod flow;
pub mod gpt;
pub mod mac;
pub mod multicast;
pub mod phy;
pub mod platform;
pub mod regs;
pub mod rx;
pub mod stats;
pub mod tx;

#[cfg(test)]
pub(crate) mod sim;

use bus::{Lan, RegisterBus};
use chip::ChipId;
use config::{ControllerConfig, DebugFlags, TransferChannel};
use gpt::{GptCallback, GptScheduler};
use mac::RegisterError;
use phy::{LinkState, PhyIdentity};
use platform::{DmaDirection, Platform, TransferStrategy};
use regs::*;
use rx::RxState;
use stats::{Statistics, bump};
use tx::QueueStop;

use crate::drivers::net::{NetworkDevice, NetworkError};
use crate::net::ethernet::MacAddress;
use crate::net::skbuff::SkBuff;
use crate::sync::Mutex;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, error, info, warn};

// ============================================================================
// Bring-up Constants
// ============================================================================

/// 10 µs polls of HW_CFG.SRST per reset cycle
const SOFT_RESET_POLLS: u32 = 1000;

/// 5 µs polls of E2P_CMD.EPC_BUSY after reset
const EEPROM_IDLE_POLLS: u32 = 1000;

/// 10 µs polls for the handler to see the self-test interrupt
const SELF_TEST_POLLS: u32 = 100_000;

/// GPIO_CFG in debug mode: GPIO0..2 outputs, LEDs off
const GPIO_CFG_DEBUG: u32 = 0x0067_0700;
const GPIO_CFG_DEBUG_LEGACY: u32 = 0x0027_0700;

/// Station address programmed when no EEPROM supplied one (00:80:0F:11:70:00)
const FALLBACK_ADDRH: u32 = 0x0000_0070;
const FALLBACK_ADDRL: u32 = 0x110F_8000;

/// ADDRH/ADDRL after reset with no EEPROM
const UNPROGRAMMED_ADDRH: u32 = 0x0000_FFFF;
const UNPROGRAMMED_ADDRL: u32 = 0xFFFF_FFFF;

// ============================================================================
// Register Dump
// ============================================================================

/// Words in the direct register block 0x50..=0xB4
pub const DUMP_DIRECT_WORDS: usize = (LAST_DIRECT_REGISTER - ID_REV) / 4 + 1;

/// MAC registers 1..=0xC
pub const DUMP_MAC_WORDS: usize = LAST_MAC_REGISTER as usize;

/// PHY registers 0..=6 and 16..=31
pub const DUMP_PHY_WORDS: usize = 7 + 16;

/// Snapshot of every register the diagnostic tool reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDump {
    pub direct: [u32; DUMP_DIRECT_WORDS],
    pub mac: [u32; DUMP_MAC_WORDS],
    pub phy: [u32; DUMP_PHY_WORDS],
}

impl RegisterDump {
    /// Size of the wire image in bytes
    pub const WIRE_LEN: usize = (DUMP_DIRECT_WORDS + DUMP_MAC_WORDS + DUMP_PHY_WORDS) * 4;

    /// Direct, MAC then PHY words, each little-endian
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::WIRE_LEN);
        for word in self.direct.iter().chain(&self.mac).chain(&self.phy) {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

/// PHY register indices captured by a dump, in dump order
fn dumped_phy_registers() -> impl Iterator<Item = u32> {
    (PHY_BCR..=PHY_ANEG_EXP).chain(16..=PHY_SPECIAL)
}

// ============================================================================
// Controller State
// ============================================================================

/// What bring-up acquired, released again by `stop()`
struct Resources {
    rx: TransferStrategy,
    tx: TransferStrategy,
    mac: MacAddress,
    /// GPIO_CFG value written at bring-up
    gpio_cfg: u32,
    phy: Option<PhyIdentity>,
}

pub struct Controller<B, P> {
    lan: Lan<B>,
    platform: P,
    config: ControllerConfig,
    chip: ChipId,
    gpt: GptScheduler,

    rx: Mutex<RxState>,
    /// Frame the Tx DMA engine is still reading
    tx_in_flight: Mutex<Option<SkBuff>>,
    tx_queue: Mutex<QueueStop>,
    stats: Mutex<Statistics>,
    resources: Mutex<Resources>,

    running: AtomicBool,
    /// Set by the handler when it services INT_STS.SW
    sw_int_seen: AtomicBool,
    stop_link_polling: AtomicBool,
    /// Last three serviced INT_STS & INT_EN values, newest first
    int_history: Mutex<[u32; 3]>,
}

impl<B: RegisterBus, P: Platform> Controller<B, P> {
    /// Identify the chip behind `bus`
    ///
    /// Only ID_REV and FPGA_REV are read; nothing is reset or enabled until
    /// [`open`](Self::open).
    pub fn new(bus: B, platform: P, config: ControllerConfig) -> Result<Self, NetworkError> {
        config.validate()?;

        let lan = Lan::new(bus);
        let id_rev = lan.read(ID_REV);
        let chip = match ChipId::from_id_rev(id_rev) {
            Ok(chip) => chip.with_fpga_rev(lan.read(FPGA_REV)),
            Err(e) => {
                warn!("[LAN911X] ID_REV 0x{:08X}: {}", id_rev, e);
                return Err(e);
            }
        };
        info!("[LAN911X] found {}", chip);
        if chip.legacy_registers() {
            info!("[LAN911X] FPGA rev 0x{:02X}, legacy register map", chip.fpga_rev());
        }

        Ok(Self {
            lan,
            platform,
            config,
            chip,
            gpt: GptScheduler::new(),
            rx: Mutex::new(RxState::new()),
            tx_in_flight: Mutex::new(None),
            tx_queue: Mutex::new(QueueStop::empty()),
            stats: Mutex::new(Statistics::default()),
            resources: Mutex::new(Resources {
                rx: TransferStrategy::Pio,
                tx: TransferStrategy::Pio,
                mac: MacAddress::zero(),
                gpio_cfg: GPIO_CFG_LEDS,
                phy: None,
            }),
            running: AtomicBool::new(false),
            sw_int_seen: AtomicBool::new(false),
            stop_link_polling: AtomicBool::new(true),
            int_history: Mutex::new([0; 3]),
        })
    }

    pub fn chip(&self) -> ChipId {
        self.chip
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// BYTE_TEST reads back its fixed pattern
    pub fn is_present(&self) -> bool {
        self.lan.read(BYTE_TEST) == BYTE_TEST_PATTERN
    }

    // ========================================================================
    // Open
    // ========================================================================

    /// Reset the chip and start both data paths
    ///
    /// The link starts down: admission stays stopped until the first link
    /// poll finds a partner.
    pub fn open(&self) -> Result<(), NetworkError> {
        if self.is_running() {
            warn!("[LAN911X] open: already running");
            return Ok(());
        }

        let byte_test = self.lan.read(BYTE_TEST);
        if byte_test != BYTE_TEST_PATTERN {
            error!("[LAN911X] BYTE_TEST 0x{:08X}, chip not responding", byte_test);
            return Err(NetworkError::HardwareNotPresent);
        }

        self.soft_reset()?;
        self.lan.write(HW_CFG, self.config.hw_cfg_tx_fifo());
        // FC trigger bits are set once a link allows pause
        self.lan.write(AFC_CFG, self.config.afc_cfg() & !AFC_CFG_FC_MASK);
        self.wait_eeprom_idle();
        self.configure_gpio();

        self.lan.write(INT_EN, 0);
        self.lan.write(INT_STS, INT_ALL);
        self.lan
            .write(INT_CFG, self.config.irq.int_cfg_bits() | INT_CFG_IRQ_EN);

        if !self.platform.attach_irq() {
            error!("[LAN911X] unable to attach interrupt handler");
            self.lan.disable_irq();
            return Err(NetworkError::IrqAttachFailed);
        }

        if let Err(e) = self.bring_up() {
            error!("[LAN911X] open failed: {}", e);
            self.release_resources();
            return Err(e);
        }

        info!("[LAN911X] {} up, MAC {}", self.chip.model(), self.mac_address());
        Ok(())
    }

    /// Everything after the interrupt line is attached
    fn bring_up(&self) -> Result<(), NetworkError> {
        self.interrupt_self_test()?;
        self.setup_mac_address()?;

        let rx = self.reserve_transfer(self.config.rx_transfer, DmaDirection::FromDevice)?;
        self.resources.lock().rx = rx;
        let tx = self.reserve_transfer(self.config.tx_transfer, DmaDirection::ToDevice)?;
        self.resources.lock().tx = tx;

        self.tx_initialize();
        self.rx_initialize();

        self.running.store(true, Ordering::Release);
        self.stop_queue(QueueStop::LINK);
        self.lan.enable_interrupts(INT_GPT);

        self.phy_initialize()
    }

    fn soft_reset(&self) -> Result<(), NetworkError> {
        for cycle in 0..self.chip.soft_reset_count() {
            self.lan.write(HW_CFG, HW_CFG_SRST);

            let mut hw_cfg = HW_CFG_SRST;
            for _ in 0..SOFT_RESET_POLLS {
                self.platform.delay_us(10);
                hw_cfg = self.lan.read(HW_CFG);
                if hw_cfg & HW_CFG_SRST == 0 {
                    break;
                }
            }
            if hw_cfg & HW_CFG_SRST != 0 {
                error!("[LAN911X] soft reset {} did not complete", cycle);
                return Err(NetworkError::Timeout);
            }
            if hw_cfg & HW_CFG_SRST_TO != 0 {
                error!("[LAN911X] soft reset {} timed out in hardware", cycle);
                return Err(NetworkError::Timeout);
            }
        }
        Ok(())
    }

    /// The EEPROM controller reloads the address after reset
    fn wait_eeprom_idle(&self) {
        for _ in 0..EEPROM_IDLE_POLLS {
            if self.lan.read(E2P_CMD) & E2P_CMD_EPC_BUSY == 0 {
                return;
            }
            self.platform.delay_us(5);
        }
        warn!("[LAN911X] timed out waiting for EEPROM busy bit to clear");
    }

    fn configure_gpio(&self) {
        let gpio_cfg = if !self.config.debug.contains(DebugFlags::GPIO) {
            GPIO_CFG_LEDS
        } else if self.chip.legacy_registers() {
            GPIO_CFG_DEBUG_LEGACY
        } else {
            GPIO_CFG_DEBUG
        };
        self.lan.write(GPIO_CFG, gpio_cfg);
        self.resources.lock().gpio_cfg = gpio_cfg;
    }

    /// Make sure the interrupt line actually reaches `handle_interrupt`
    fn interrupt_self_test(&self) -> Result<(), NetworkError> {
        self.signal_software_interrupt();
        for _ in 0..SELF_TEST_POLLS {
            if self.sw_int_seen.load(Ordering::Acquire) {
                debug!("[LAN911X] interrupt self-test passed");
                return Ok(());
            }
            self.platform.delay_us(10);
        }
        self.lan.disable_interrupts(INT_SW);
        error!("[LAN911X] software interrupt never reached the handler");
        Err(NetworkError::SelfTestFailed)
    }

    fn setup_mac_address(&self) -> Result<(), NetworkError> {
        let held = self.lan.acquire_mac_phy();
        let write = |addrh: u32, addrl: u32| {
            self.lan
                .mac_write(&held, ADDRH, addrh)
                .and_then(|_| self.lan.mac_write(&held, ADDRL, addrl))
        };

        let mac = match self.config.mac_address {
            Some(mac) => {
                let (addrh, addrl) = mac.to_registers();
                write(addrh, addrl).map_err(|_| NetworkError::HardwareError)?;
                debug!("[LAN911X] using configured MAC address");
                mac
            }
            None => {
                let addrh = self
                    .lan
                    .mac_read(&held, ADDRH)
                    .map_err(|_| NetworkError::HardwareError)?;
                let addrl = self
                    .lan
                    .mac_read(&held, ADDRL)
                    .map_err(|_| NetworkError::HardwareError)?;
                if addrh == UNPROGRAMMED_ADDRH && addrl == UNPROGRAMMED_ADDRL {
                    warn!("[LAN911X] no MAC address in EEPROM, using fallback");
                    write(FALLBACK_ADDRH, FALLBACK_ADDRL).map_err(|_| NetworkError::HardwareError)?;
                    MacAddress::from_registers(FALLBACK_ADDRH, FALLBACK_ADDRL)
                } else {
                    MacAddress::from_registers(addrh, addrl)
                }
            }
        };
        drop(held);

        self.resources.lock().mac = mac;
        Ok(())
    }

    fn reserve_transfer(
        &self,
        transfer: TransferChannel,
        direction: DmaDirection,
    ) -> Result<TransferStrategy, NetworkError> {
        let channel = match transfer {
            TransferChannel::Pio => return Ok(TransferStrategy::Pio),
            TransferChannel::Request => self.platform.request_dma_channel(direction),
            TransferChannel::Channel(channel) => self
                .platform
                .reserve_dma_channel(channel, direction)
                .then_some(channel),
        };
        match channel {
            Some(channel) => Ok(TransferStrategy::Dma { channel }),
            None => {
                error!("[LAN911X] no DMA channel for {:?} ({:?})", direction, transfer);
                Err(NetworkError::DmaChannelUnavailable)
            }
        }
    }

    /// Give back the DMA channels and the interrupt line
    fn release_resources(&self) {
        self.running.store(false, Ordering::Release);
        self.lan.disable_irq();
        self.lan.write(INT_EN, 0);

        let (rx, tx) = {
            let mut resources = self.resources.lock();
            let taken = (resources.rx, resources.tx);
            resources.rx = TransferStrategy::Pio;
            resources.tx = TransferStrategy::Pio;
            taken
        };
        for strategy in [rx, tx] {
            if let TransferStrategy::Dma { channel } = strategy {
                self.platform.release_dma_channel(channel);
            }
        }
        self.platform.detach_irq();
    }

    // ========================================================================
    // Stop
    // ========================================================================

    /// Take the interface down; a no-op when it is not running
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }

        self.stop_link_polling.store(true, Ordering::Release);
        self.platform.cancel_link_timer();
        self.lan.disable_interrupts(INT_GPT);
        self.gpt.reset(&self.lan);

        self.update_tx_counters();
        self.running.store(false, Ordering::Release);
        self.lan.disable_irq();

        let (rx, tx) = {
            let resources = self.resources.lock();
            (resources.rx, resources.tx)
        };
        if let TransferStrategy::Dma { channel } = tx {
            self.wait_tx_dma_complete(channel);
        }
        if let TransferStrategy::Dma { channel } = rx {
            self.wait_rx_dma_complete(channel);
        }
        self.stop_queue(QueueStop::LINK);

        self.release_resources();
        info!("[LAN911X] stopped");
    }

    // ========================================================================
    // Interrupt Handler
    // ========================================================================

    /// Service the chip's interrupt line
    ///
    /// Returns false when the interrupt was not ours (shared lines) or the
    /// chip looks gone.
    pub fn handle_interrupt(&self) -> bool {
        let int_cfg = self.lan.read(INT_CFG);
        if int_cfg & INT_CFG_ASSERTED != INT_CFG_ASSERTED {
            return false;
        }

        let reserved = int_cfg & self.chip.int_cfg_reserved();
        if reserved != 0 {
            warn!("[LAN911X] INT_CFG reserved bits set: 0x{:08X}", int_cfg);
            return false;
        }

        let status = self.lan.read(INT_STS) & self.lan.read(INT_EN);
        {
            let mut history = self.int_history.lock();
            *history = [status, history[0], history[1]];
        }
        if self.config.debug.contains(DebugFlags::TRACE) {
            debug!("[LAN911X] interrupt 0x{:08X}", status);
        }

        let mut serviced = self.handle_software_interrupt(status);
        if status & INT_GPT != 0 {
            self.lan.write(INT_STS, INT_GPT);
            self.gpt.on_timer_interrupt(&self.lan, |callback| self.run_gpt_callback(callback));
            serviced = true;
        }
        serviced |= self.handle_tx_interrupt(status);
        serviced |= self.handle_rx_stop(status);
        serviced |= self.handle_rx_interrupt(status);

        if !serviced {
            warn!(
                "[LAN911X] unserviced interrupt: INT_STS 0x{:08X} INT_EN 0x{:08X}",
                self.lan.read(INT_STS),
                self.lan.read(INT_EN)
            );
        }
        serviced
    }

    fn run_gpt_callback(&self, callback: GptCallback) {
        match callback {
            GptCallback::MeasureRxThroughput => self.measure_rx_throughput(),
            GptCallback::RestartBurst => self.restart_rx_burst(),
            GptCallback::CompleteMulticastUpdate => self.complete_multicast_update(),
        }
    }

    /// Schedule a GPT callback; failures only cost the callback
    fn schedule_gpt(&self, callback: GptCallback, units: u32) {
        if let Err(e) = self.gpt.schedule(&self.lan, callback, units) {
            warn!("[LAN911X] {:?} not scheduled: {}", callback, e);
        }
    }

    /// INT_STS & INT_EN of the last three interrupts, newest first
    pub fn interrupt_history(&self) -> [u32; 3] {
        *self.int_history.lock()
    }

    // ========================================================================
    // Statistics and Diagnostics
    // ========================================================================

    /// Counter snapshot, folding in what the chip still holds
    pub fn statistics(&self) -> Statistics {
        if self.is_running() {
            let dropped = self.lan.read(RX_DROP);
            bump(&mut self.stats.lock().rx_dropped, dropped);
            self.update_tx_counters();
        }
        *self.stats.lock()
    }

    /// Read every direct, MAC and PHY register
    ///
    /// Reading RX_DROP clears it, so its count goes into the statistics.
    pub fn dump_registers(&self) -> RegisterDump {
        let mut dump = RegisterDump {
            direct: [0; DUMP_DIRECT_WORDS],
            mac: [0; DUMP_MAC_WORDS],
            phy: [0; DUMP_PHY_WORDS],
        };

        for (index, word) in dump.direct.iter_mut().enumerate() {
            let offset = ID_REV + index * 4;
            *word = self.lan.read(offset);
            if offset == RX_DROP {
                bump(&mut self.stats.lock().rx_dropped, *word);
            }
        }

        let held = self.lan.acquire_mac_phy();
        for (index, word) in dump.mac.iter_mut().enumerate() {
            *word = self
                .lan
                .mac_read(&held, MAC_CR + index as u32)
                .unwrap_or_else(RegisterError::mac_sentinel);
        }
        for (word, index) in dump.phy.iter_mut().zip(dumped_phy_registers()) {
            *word = self
                .lan
                .phy_read(&held, index)
                .unwrap_or_else(RegisterError::mii_sentinel) as u32;
        }
        dump
    }

    // ========================================================================
    // Station Address
    // ========================================================================

    pub fn mac_address(&self) -> MacAddress {
        self.resources.lock().mac
    }

    /// Program a new station address into ADDRH/ADDRL
    pub fn set_mac_address(&self, mac: MacAddress) -> Result<(), NetworkError> {
        if !mac.is_valid_station() {
            return Err(NetworkError::InvalidConfiguration);
        }

        let (addrh, addrl) = mac.to_registers();
        let held = self.lan.acquire_mac_phy();
        let written = self
            .lan
            .mac_write(&held, ADDRH, addrh)
            .and_then(|_| self.lan.mac_write(&held, ADDRL, addrl));
        drop(held);
        if let Err(e) = written {
            warn!("[LAN911X] set MAC address {}", e);
            return Err(NetworkError::HardwareError);
        }

        self.resources.lock().mac = mac;
        info!("[LAN911X] MAC address set to {}", mac);
        Ok(())
    }

    pub fn link_up(&self) -> bool {
        matches!(self.link_state(), LinkState::Up(_))
    }
}

impl<B: RegisterBus, P: Platform> NetworkDevice for Controller<B, P> {
    fn is_present(&self) -> bool {
        self.is_present()
    }

    fn open(&self) -> Result<(), NetworkError> {
        self.open()
    }

    fn stop(&self) {
        self.stop()
    }

    fn transmit(&self, frame: SkBuff) -> Result<(), NetworkError> {
        self.send(frame)
    }

    fn tx_queue_stopped(&self) -> bool {
        self.queue_stopped()
    }

    fn mac_address(&self) -> MacAddress {
        self.mac_address()
    }

    fn link_up(&self) -> bool {
        self.link_up()
    }
}
