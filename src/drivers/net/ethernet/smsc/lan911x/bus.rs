//! Direct register access
//!
//! Everything the driver does to the chip bottoms out in a 32-bit read or
//! write of a direct register. `RegisterBus` is that seam: `MmioBus` talks
//! to real hardware through volatile pointers, tests plug in a simulated
//! register file instead.
//!
//! `Lan` layers the handful of read-modify-write helpers on top, including
//! the INT_EN/INT_CFG updates that several contexts race on, and owns the
//! lock behind which every MAC and PHY register lives (see `mac.rs`).

use super::gpt::{GptTimer, load_for_ticks};
use super::mac::MacPhyState;
use super::regs::*;
use crate::sync::{Mutex, VerifiableLock};
use volatile::Volatile;

/// 32-bit access to the LAN911x direct register block
///
/// Offsets are byte offsets from the chip base. Implementations must not
/// reorder or merge accesses: FIFO ports pop on every read.
pub trait RegisterBus {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

/// Memory-mapped LAN911x register window
pub struct MmioBus {
    base: usize,
}

impl MmioBus {
    /// # Safety
    ///
    /// `base` must be the virtual address of a mapped LAN911x register
    /// window (at least `LAST_DIRECT_REGISTER + 4` bytes, device memory),
    /// and nothing else may drive the chip while this bus exists.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl RegisterBus for MmioBus {
    fn read(&self, offset: usize) -> u32 {
        let reg = (self.base + offset) as *const Volatile<u32>;
        // SAFETY: MmioBus::new's contract guarantees base..base+offset is a
        // mapped register; volatile read prevents elision/reordering
        unsafe { (*reg).read() }
    }

    fn write(&self, offset: usize, value: u32) {
        let reg = (self.base + offset) as *mut Volatile<u32>;
        // SAFETY: as above; volatile write reaches the device exactly once
        unsafe { (*reg).write(value) }
    }
}

/// Direct register layer shared by every engine of one controller
pub struct Lan<B> {
    bus: B,
    /// Serializes read-modify-write of INT_EN and INT_CFG
    int_en_lock: Mutex<()>,
    /// MAC_CSR/MII access and the state that rides along with it
    pub(super) mac_phy: VerifiableLock<MacPhyState>,
}

impl<B: RegisterBus> Lan<B> {
    pub const fn new(bus: B) -> Self {
        Self {
            bus,
            int_en_lock: Mutex::new(()),
            mac_phy: VerifiableLock::new(MacPhyState::new()),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[inline]
    pub fn read(&self, offset: usize) -> u32 {
        self.bus.read(offset)
    }

    #[inline]
    pub fn write(&self, offset: usize, value: u32) {
        self.bus.write(offset, value)
    }

    pub fn set_bits(&self, offset: usize, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value | bits);
    }

    pub fn clear_bits(&self, offset: usize, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value & !bits);
    }

    /// Current FREE_RUN count (25 MHz)
    pub fn free_run(&self) -> u32 {
        self.read(FREE_RUN)
    }

    pub fn enable_interrupts(&self, mask: u32) {
        let _guard = self.int_en_lock.lock();
        self.set_bits(INT_EN, mask);
    }

    pub fn disable_interrupts(&self, mask: u32) {
        let _guard = self.int_en_lock.lock();
        self.clear_bits(INT_EN, mask);
    }

    /// Drop INT_EN to zero and restore it
    ///
    /// Lets the interrupt deassertion interval start over while the
    /// receive path backs off.
    pub fn pulse_interrupt_enable(&self) {
        let _guard = self.int_en_lock.lock();
        let enabled = self.read(INT_EN);
        self.write(INT_EN, 0);
        self.write(INT_EN, enabled);
    }

    /// Unmask the chip's IRQ output
    pub fn enable_irq(&self) {
        let _guard = self.int_en_lock.lock();
        self.set_bits(INT_CFG, INT_CFG_IRQ_EN);
    }

    pub fn disable_irq(&self) {
        let _guard = self.int_en_lock.lock();
        self.clear_bits(INT_CFG, INT_CFG_IRQ_EN);
    }

    /// Minimum IRQ deassertion interval, in 10 µs units
    pub fn set_interrupt_deassertion(&self, interval: u8) {
        let _guard = self.int_en_lock.lock();
        let value = self.read(INT_CFG) & !INT_CFG_INT_DEAS;
        self.write(INT_CFG, value | ((interval as u32) << INT_CFG_INT_DEAS_SHIFT));
    }

    // FIFO_INT levels. Rx only writes its fields during bring-up, so Tx just
    // has to preserve them.

    pub fn set_tx_data_level(&self, level: u8) {
        let value = self.read(FIFO_INT) & !FIFO_INT_TX_AVAIL_LEVEL;
        self.write(FIFO_INT, value | ((level as u32) << FIFO_INT_TX_AVAIL_LEVEL_SHIFT));
    }

    pub fn set_rx_data_level(&self, level: u8) {
        let value = self.read(FIFO_INT) & !FIFO_INT_RX_AVAIL_LEVEL;
        self.write(FIFO_INT, value | ((level as u32) << FIFO_INT_RX_AVAIL_LEVEL_SHIFT));
    }

    pub fn set_rx_status_level(&self, level: u8) {
        let value = self.read(FIFO_INT) & !FIFO_INT_RX_STS_LEVEL;
        self.write(FIFO_INT, value | level as u32);
    }
}

impl<B: RegisterBus> GptTimer for Lan<B> {
    fn now(&self) -> u32 {
        self.free_run()
    }

    fn arm(&self, ticks: i32) {
        self.write(GPT_CFG, load_for_ticks(ticks) | GPT_CFG_TIMER_EN);
        self.write(INT_STS, INT_GPT);
    }

    fn disarm(&self) {
        self.write(GPT_CFG, 0);
        self.write(INT_STS, INT_GPT);
    }
}
