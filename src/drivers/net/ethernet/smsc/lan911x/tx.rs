//! Transmit engine
//!
//! Every frame goes into the Tx data FIFO as two command words followed by
//! the frame data:
//!
//! ```text
//! A: [31] IOC  [25:24] end align  [20:16] start offset  [13] FS  [12] LS  [10:0] buffer size
//! B: [31:16] packet tag (= length)                                         [10:0] packet length
//! ```
//!
//! Small frames are copied word by word (PIO). With a Tx DMA channel,
//! frames at or above `dma_threshold` are handed to the platform's DMA
//! engine instead; the buffer is kept until the engine reports completion
//! and admission is paused meanwhile.
//!
//! The chip reports one status word per frame. They are drained lazily:
//! when 30 have piled up, and whenever statistics are read.
//!
//! Admission is gated by a mask of stop sources. The host queue is stopped
//! when the first source appears and woken when the last one clears.

use super::Controller;
use super::bus::RegisterBus;
use super::platform::{DmaSegment, Platform, TransferStrategy};
use super::regs::*;
use super::stats::{Statistics, bump};
use crate::drivers::net::NetworkError;
use crate::net::skbuff::SkBuff;
use core::sync::atomic::Ordering;
use log::{debug, warn};

/// Free Tx data FIFO bytes below which admission stops
pub const TX_FIFO_LOW_THRESHOLD: u32 = 1600;

/// Pending status words that trigger a drain from `send`
pub const TX_STATUS_DRAIN_THRESHOLD: u32 = 30;

/// Per-frame overhead in the data FIFO (command words and slack)
const TX_FRAME_OVERHEAD: u32 = 32;

/// TDFA level (in 64-byte units) while waiting for FIFO space
const TX_DATA_LEVEL_LOW: u8 = 0x32;

/// TDFA level that keeps the interrupt quiet
const TX_DATA_LEVEL_OFF: u8 = 0xFF;

/// 10 µs polls for an in-flight Tx DMA at stop
const TX_DMA_WAIT_POLLS: u32 = 100_000;

/// Largest frame one command can carry
pub const TX_MAX_FRAME_LEN: usize = TX_CMD_A_BUF_SIZE as usize;

/// Reasons transmit admission is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStop(u32);

impl QueueStop {
    /// No carrier
    pub const LINK: Self = Self(0x01);
    /// Tx data FIFO below the low-water mark
    pub const FIFO_LOW: Self = Self(0x02);
    /// A DMA transfer owns the data FIFO
    pub const DMA: Self = Self(0x04);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Command words for one single-segment frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxCommand {
    pub a: u32,
    pub b: u32,
}

impl TxCommand {
    /// PIO: words start at the 4-byte boundary below `data_addr`
    pub fn pio(data_addr: usize, len: u32) -> Self {
        Self {
            a: (((data_addr & 0x3) as u32) << TX_CMD_A_DATA_OFFSET_SHIFT)
                | TX_CMD_A_FIRST_SEG
                | TX_CMD_A_LAST_SEG
                | len,
            b: (len << TX_CMD_B_PKT_TAG_SHIFT) | len,
        }
    }

    /// DMA: transfer starts and ends on cache-line boundaries
    pub fn dma(data_addr: usize, len: u32, cache_line: usize) -> Self {
        let end_align = if cache_line == 16 {
            TX_CMD_A_BUF_END_ALGN_16
        } else {
            TX_CMD_A_BUF_END_ALGN_32
        };
        Self {
            a: end_align
                | (((data_addr & (cache_line - 1)) as u32) << TX_CMD_A_DATA_OFFSET_SHIFT)
                | TX_CMD_A_FIRST_SEG
                | TX_CMD_A_LAST_SEG
                | len,
            b: (len << TX_CMD_B_PKT_TAG_SHIFT) | (len & TX_CMD_B_PKT_BYTE_LENGTH),
        }
    }
}

/// Memory the DMA engine has to copy for a frame at `data_addr`
pub fn tx_dma_segment(data_addr: usize, len: usize, cache_line: usize) -> DmaSegment {
    let mask = cache_line - 1;
    DmaSegment {
        addr: data_addr & !mask,
        len: (len + mask + (data_addr & mask)) & !mask,
    }
}

/// Fold one Tx status word into the counters
pub fn account_tx_status(stats: &mut Statistics, status: u32) {
    if status & TX_STS_BOGUS != 0 {
        warn!("[LAN911X] Tx status tag reserved bit set: 0x{:08X}", status);
        bump(&mut stats.tx_errors, 1);
        return;
    }
    if status & TX_STS_HARD_FAILURE != 0 {
        warn!("[LAN911X] Tx status reserved bits set: 0x{:08X}", status);
        bump(&mut stats.tx_errors, 1);
        return;
    }

    if status & TX_STS_ES != 0 {
        bump(&mut stats.tx_errors, 1);
    } else {
        bump(&mut stats.tx_packets, 1);
        bump(&mut stats.tx_bytes, status >> TX_STS_PACKET_TAG_SHIFT);
    }

    if status & TX_STS_EXCESSIVE_COLLISIONS != 0 {
        bump(&mut stats.collisions, 16);
        bump(&mut stats.tx_aborted, 1);
    } else {
        bump(
            &mut stats.collisions,
            (status >> TX_STS_COLLISION_COUNT_SHIFT) & TX_STS_COLLISION_COUNT,
        );
    }
    if status & TX_STS_LOSS_OF_CARRIER != 0 {
        bump(&mut stats.tx_carrier_errors, 1);
    }
    if status & TX_STS_LATE_COLLISION != 0 {
        bump(&mut stats.collisions, 1);
        bump(&mut stats.tx_aborted, 1);
    }
}

/// Little-endian FIFO words for `data`, preceded by `offset` pad bytes
fn fifo_words(data: &[u8], offset: usize) -> impl Iterator<Item = u32> + '_ {
    let words = (data.len() + offset).div_ceil(4);
    (0..words).map(move |word| {
        let mut bytes = [0u8; 4];
        for (k, byte) in bytes.iter_mut().enumerate() {
            let index = (word * 4 + k).wrapping_sub(offset);
            if let Some(&value) = data.get(index) {
                *byte = value;
            }
        }
        u32::from_le_bytes(bytes)
    })
}

impl<B: RegisterBus, P: Platform> Controller<B, P> {
    // ========================================================================
    // Bring-up
    // ========================================================================

    pub(super) fn tx_initialize(&self) {
        let hw_cfg = self.lan.read(HW_CFG) & (HW_CFG_TX_FIF_SZ | 0x0000_0FFF);
        self.lan.write(HW_CFG, hw_cfg | HW_CFG_SF);

        self.lan.set_tx_data_level(TX_DATA_LEVEL_OFF);
        self.lan.enable_interrupts(INT_TDFA);

        match self.resources.lock().tx {
            TransferStrategy::Pio => debug!("[LAN911X] Tx will use PIO"),
            TransferStrategy::Dma { channel } => {
                debug!("[LAN911X] Tx will use DMA channel {}", channel)
            }
        }

        {
            let held = self.lan.acquire_mac_phy();
            if let Err(e) = self
                .lan
                .mac_modify(&held, MAC_CR, 0, MAC_CR_TXEN | MAC_CR_HBDIS)
            {
                warn!("[LAN911X] Tx enable {}", e);
            }
            self.lan.write(TX_CFG, TX_CFG_TX_ON);
        }

        *self.tx_in_flight.lock() = None;
        *self.tx_queue.lock() = QueueStop::empty();
    }

    // ========================================================================
    // Admission
    // ========================================================================

    pub fn stop_queue(&self, source: QueueStop) {
        let mut mask = self.tx_queue.lock();
        if mask.is_empty() {
            self.platform.stop_queue();
        }
        mask.insert(source);
    }

    pub fn wake_queue(&self, source: QueueStop) {
        let mut mask = self.tx_queue.lock();
        if mask.is_empty() {
            return;
        }
        mask.remove(source);
        if mask.is_empty() {
            self.platform.wake_queue();
        }
    }

    /// Whether the host should hold off queueing frames
    pub fn queue_stopped(&self) -> bool {
        !self.tx_queue.lock().is_empty()
    }

    pub fn queue_stop_reasons(&self) -> QueueStop {
        *self.tx_queue.lock()
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Queue one frame for transmission
    ///
    /// Completion is only visible in the statistics. A low Tx FIFO is not an
    /// error; the frame is still written and admission stops afterwards.
    pub fn send(&self, frame: SkBuff) -> Result<(), NetworkError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(NetworkError::NotInitialized);
        }
        if frame.is_empty() {
            return Err(NetworkError::FrameTooSmall);
        }
        if frame.len() > TX_MAX_FRAME_LEN {
            return Err(NetworkError::FrameTooLarge);
        }

        let strategy = self.resources.lock().tx;
        let len = frame.len() as u32;

        let mut in_flight = self.tx_in_flight.lock();
        if in_flight.is_some() {
            return Err(NetworkError::TxBufferFull);
        }

        let mut free = self.lan.read(TX_FIFO_INF) & TX_FIFO_INF_TDFREE;
        if free < TX_FIFO_LOW_THRESHOLD {
            warn!("[LAN911X] Tx data FIFO low, {} bytes free", free);
        }

        let dma_channel = match strategy {
            TransferStrategy::Dma { channel } if len >= self.config.dma_threshold => Some(channel),
            _ => None,
        };

        match dma_channel {
            Some(channel) => {
                let cache_line = self.config.cache_line_size;
                let command = TxCommand::dma(frame.data_addr(), len, cache_line);
                let segment = tx_dma_segment(frame.data_addr(), frame.len(), cache_line);
                self.platform.cache_purge(segment.addr, segment.len);

                self.lan.write(TX_DATA_FIFO, command.a);
                self.lan.write(TX_DATA_FIFO, command.b);
                if let Err(e) = self.platform.start_tx_dma(channel, segment) {
                    // The command words are already queued; the frame stays
                    // in flight until the engine reports back
                    warn!("[LAN911X] Tx DMA start failed: {}", e);
                }
                *in_flight = Some(frame);
                drop(in_flight);
                self.stop_queue(QueueStop::DMA);
            }
            None => {
                let offset = frame.data_addr() & 0x3;
                let command = TxCommand::pio(frame.data_addr(), len);
                self.lan.write(TX_DATA_FIFO, command.a);
                self.lan.write(TX_DATA_FIFO, command.b);
                for word in fifo_words(frame.data(), offset) {
                    self.lan.write(TX_DATA_FIFO, word);
                }
                drop(in_flight);
            }
        }
        free = free.saturating_sub(len + TX_FRAME_OVERHEAD);

        if self.tx_status_count() >= TX_STATUS_DRAIN_THRESHOLD {
            self.update_tx_counters();
        }
        if free < TX_FIFO_LOW_THRESHOLD {
            self.stop_queue(QueueStop::FIFO_LOW);
            self.lan.set_tx_data_level(TX_DATA_LEVEL_LOW);
        }
        Ok(())
    }

    /// DMA engine finished copying the in-flight frame
    pub fn on_tx_dma_complete(&self) {
        let frame = self.tx_in_flight.lock().take();
        if frame.is_none() {
            warn!("[LAN911X] Tx DMA completion with no frame in flight");
        }
        drop(frame);
        self.wake_queue(QueueStop::DMA);
    }

    /// Bounded wait for an in-flight Tx DMA, used while stopping
    ///
    /// On timeout the transfer is aborted before its buffer is released.
    pub(super) fn wait_tx_dma_complete(&self, channel: u32) {
        for _ in 0..TX_DMA_WAIT_POLLS {
            if self.tx_in_flight.lock().is_none() {
                return;
            }
            self.platform.delay_us(10);
        }
        warn!("[LAN911X] timed out waiting for Tx DMA to complete, aborting");
        self.platform.abort_dma(channel);
        if self.tx_in_flight.lock().take().is_some() {
            bump(&mut self.stats.lock().tx_errors, 1);
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Status words waiting in the Tx status FIFO
    fn tx_status_count(&self) -> u32 {
        let used = (self.lan.read(TX_FIFO_INF) & TX_FIFO_INF_TSUSED) >> TX_FIFO_INF_TSUSED_SHIFT;
        if !self.chip.legacy_registers() {
            return used;
        }
        // Old FPGA builds report free entries out of 0x80
        if used > 0x80 {
            warn!("[LAN911X] TX_FIFO_INF status free count 0x{:X} > 0x80", used);
            return 0;
        }
        0x80 - used
    }

    /// Next Tx status word, 0 when none is waiting
    fn pop_tx_status(&self) -> u32 {
        if self.tx_status_count() == 0 {
            return 0;
        }
        self.lan.read(TX_STATUS_FIFO)
    }

    /// Drain the Tx status FIFO into the counters
    pub(super) fn update_tx_counters(&self) {
        let mut stats = self.stats.lock();
        loop {
            let status = self.pop_tx_status();
            if status == 0 {
                break;
            }
            account_tx_status(&mut stats, status);
        }
    }

    pub(super) fn handle_tx_interrupt(&self, status: u32) -> bool {
        if status & INT_TDFA == 0 {
            return false;
        }
        self.lan.set_tx_data_level(TX_DATA_LEVEL_OFF);
        self.lan.write(INT_STS, INT_TDFA);
        self.wake_queue(QueueStop::FIFO_LOW);
        true
    }
}
