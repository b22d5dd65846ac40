//! Receive engine
//!
//! The chip queues one status word per received frame in the Rx status
//! FIFO and the frame itself in the Rx data FIFO:
//!
//! ```text
//! status: [29:16] frame length incl. FCS  [15] ES  [12] length error
//!         [10] multicast  [5] frame type  [1] CRC error
//! data:   RXDOFF pad bytes | frame | FCS | pad to the RX_CFG end alignment
//! ```
//!
//! Frames are drained from the interrupt handler (or a deferred worker)
//! by PIO, or in scatter-gather batches by the platform's DMA engine.
//! Frames with errors, and frames no buffer could be found for, are
//! skipped with a fast-forward.
//!
//! Status words are only consumed while flow control admits them (see
//! `flow.rs`), and not at all once the host queue reports congestion.
//!
//! ## Overrun recovery on generation 0
//!
//! The first silicon cannot recover from an Rx data FIFO overrun on its
//! own. The receiver is stopped, the frames already complete in the FIFO
//! are drained until the running byte count gets close to the FIFO size,
//! and whatever is left is thrown away with RX_DUMP before the receiver
//! comes back on.

use super::Controller;
use super::bus::RegisterBus;
use super::flow::{
    FlowControl, FlowControlParameters, FlowControlSnapshot, MEASUREMENT_PERIOD, WindowOutcome,
};
use super::gpt::GptCallback;
use super::platform::{DmaSegment, Platform, RxVerdict, TransferStrategy};
use super::regs::*;
use super::stats::{Statistics, bump};
use crate::drivers::net::NetworkError;
use crate::net::ethernet::HEADER_SIZE;
use crate::net::skbuff::{SkBuff, SkBuffError};
use alloc::vec::Vec;
use log::{debug, info, warn};

/// 1 µs polls of RX_DP_CTRL.FFWD_BUSY
const FAST_FORWARD_POLLS: u32 = 500;

/// Frames shorter than this many words are read out instead of skipped
const FAST_FORWARD_MIN_WORDS: u32 = 4;

/// 1 µs polls of INT_STS.RXSTOP during overrun recovery
const RX_STOP_POLLS: u32 = 2000;

/// 1 µs polls of RX_CFG.RX_DUMP
const RX_DUMP_POLLS: u32 = 10_000_000;

/// 10 µs polls for an Rx DMA batch to land while stopping
const RX_DMA_WAIT_POLLS: u32 = 1000;

/// Bytes kept free below the Rx data FIFO size while draining an overrun
const OVERRUN_MARGIN: u32 = 16;

/// PIO buffers start this far in so the IP header lands word aligned
const PIO_HEADROOM: usize = 2;

/// Frame length field of an Rx status word
#[inline]
pub fn rx_frame_len(status: u32) -> u32 {
    (status >> RX_STS_LENGTH_SHIFT) & RX_STS_LENGTH_MASK
}

/// Data FIFO words a PIO read of this frame takes (RXDOFF 2, 4-byte end)
#[inline]
pub fn pio_words(frame_len: u32) -> u32 {
    (frame_len + 2 + 3) >> 2
}

/// Bytes a DMA read of this frame takes with a cache-line end alignment
///
/// RXDOFF puts `cache_line - 14` pad bytes first, so the IP header starts
/// a cache line.
#[inline]
pub fn dma_transfer_len(frame_len: u32, cache_line: u32) -> u32 {
    (frame_len + (cache_line - HEADER_SIZE as u32) + cache_line - 1) & !(cache_line - 1)
}

/// Fold the error bits of one status word into the counters
///
/// Returns true for frames the chip flagged as bad.
pub fn count_rx_errors(stats: &mut Statistics, status: u32) -> bool {
    let mut crc_error = false;
    let bad = status & RX_STS_ES != 0;
    if bad {
        bump(&mut stats.rx_errors, 1);
        if status & RX_STS_CRC_ERROR != 0 {
            bump(&mut stats.rx_crc_errors, 1);
            crc_error = true;
        }
    }
    if !crc_error {
        let length_error = RX_STS_LENGTH_ERROR | RX_STS_FRAME_TYPE;
        if status & length_error == length_error {
            bump(&mut stats.rx_length_errors, 1);
        }
        if status & RX_STS_MCAST != 0 {
            bump(&mut stats.multicast, 1);
        }
    }
    bad
}

/// Buffer for one frame, data window already set to the frame
fn frame_buffer(capacity: usize, headroom: usize, len: usize) -> Result<SkBuff, SkBuffError> {
    let mut skb = SkBuff::alloc(capacity)?;
    skb.reserve(headroom)?;
    skb.put(len)?;
    Ok(skb)
}

/// Generation 0 overrun bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OverrunRecovery {
    /// Bytes of complete frames drained since the overrun
    unloaded: u32,
}

/// Receive engine state, behind the controller's Rx lock
pub(super) struct RxState {
    flow: FlowControl,
    /// Interrupt sources the engine owns in INT_EN
    interrupts: u32,
    /// Host queue asked us to stop draining
    congested: bool,
    overrun: Option<OverrunRecovery>,
    /// Last three status words consumed, newest first
    last_status: [u32; 3],
    /// Buffers the DMA engine is filling
    dma_in_flight: Vec<SkBuff>,
    /// Bad frame behind the DMA batch, skipped when the batch completes
    drop_after_dma: Option<u32>,
}

impl RxState {
    pub(super) fn new() -> Self {
        Self {
            flow: FlowControl::new(FlowControlParameters::pio_defaults(), None),
            interrupts: 0,
            congested: false,
            overrun: None,
            last_status: [0; 3],
            dma_in_flight: Vec::new(),
            drop_after_dma: None,
        }
    }

    fn remember(&mut self, status: u32) {
        self.last_status = [status, self.last_status[0], self.last_status[1]];
    }

    pub(super) fn dma_in_flight(&self) -> bool {
        !self.dma_in_flight.is_empty()
    }
}

impl<B: RegisterBus, P: Platform> Controller<B, P> {
    // ========================================================================
    // Bring-up
    // ========================================================================

    pub(super) fn rx_initialize(&self) {
        let strategy = self.resources.lock().rx;
        let defaults = if strategy.is_dma() {
            FlowControlParameters::dma_defaults()
        } else {
            FlowControlParameters::pio_defaults()
        };
        let parameters = defaults.with_overrides(&self.config.flow);
        let flow = FlowControl::new(parameters, self.config.flow.max_work_load);
        debug!(
            "[LAN911X] Rx flow control: max work load {}, burst {}",
            flow.max_work_load(),
            flow.burst_max_work_load()
        );

        let deassertion = self
            .config
            .irq
            .deassertion
            .unwrap_or(flow.parameters().int_deas);
        self.lan.set_interrupt_deassertion(deassertion);

        let mut rx = self.rx.lock();
        *rx = RxState::new();
        rx.flow = flow;
        rx.interrupts = INT_RSFL | INT_RXE | self.chip.overrun_interrupt() | INT_RXDFH;

        // Off until now; the count starts at one so this turns it on
        self.lan.acquire_mac_phy().rx_off_count = 1;
        self.lan.write(RX_CFG, RX_CFG_PIO);
        if let Err(e) = self.lan.receiver_on() {
            warn!("[LAN911X] Rx init: receiver not enabled: {}", e);
        }

        self.lan.set_rx_data_level(0x01);
        self.lan.set_rx_status_level(0x00);
        self.lan.enable_interrupts(rx.interrupts);

        match strategy {
            TransferStrategy::Pio => debug!("[LAN911X] Rx will use PIO"),
            TransferStrategy::Dma { channel } => {
                debug!("[LAN911X] Rx will use DMA channel {}", channel)
            }
        }
    }

    // ========================================================================
    // Interrupt
    // ========================================================================

    pub(super) fn handle_rx_interrupt(&self, status: u32) -> bool {
        let mut serviced = false;

        if status & INT_RXE != 0 {
            bump(&mut self.stats.lock().rx_errors, 1);
            self.lan.write(INT_STS, INT_RXE);
            serviced = true;
        }
        if status & INT_RXDFH != 0 {
            let dropped = self.lan.read(RX_DROP);
            bump(&mut self.stats.lock().rx_dropped, dropped);
            self.lan.write(INT_STS, INT_RXDFH);
            serviced = true;
        }

        let mut rx = self.rx.lock();
        let overrun_bit = self.chip.overrun_interrupt();
        if status & overrun_bit != 0 {
            self.lan.write(INT_STS, overrun_bit);
            self.handle_overrun(&mut rx);
            serviced = true;
        }

        if status & INT_RSFL == 0 && rx.overrun.is_none() {
            return serviced;
        }
        if rx.dma_in_flight() {
            // The completion re-enables the Rx interrupts
            return serviced;
        }

        if rx.flow.start_window() {
            self.schedule_gpt(GptCallback::MeasureRxThroughput, MEASUREMENT_PERIOD);
        }

        drop(rx);

        if self.config.deferred_rx {
            self.lan.disable_irq();
            self.platform.schedule_deferred_rx();
        } else {
            self.process_packets();
        }
        true
    }

    /// Deferred worker body: drain, then let the chip interrupt again
    ///
    /// The chip's IRQ_EN stays off until the drain ends, so the Rx state
    /// lock is only taken per frame and the CPU keeps taking other
    /// interrupts in between.
    pub fn run_deferred_rx(&self) {
        self.process_packets();
        self.lan.enable_irq();
    }

    // ========================================================================
    // Overrun
    // ========================================================================

    fn handle_overrun(&self, rx: &mut RxState) {
        bump(&mut self.stats.lock().rx_overruns, 1);
        if self.chip.generation() != 0 || rx.overrun.is_some() {
            return;
        }

        if let Err(e) = self.lan.receiver_off() {
            warn!("[LAN911X] Rx data FIFO overrun, receiver not stopped: {}", e);
            return;
        }
        // The statuses consumed before the overrun may still have data in
        // the FIFO
        let mut unloaded = (rx_frame_len(rx.last_status[0]) + 2 + 3) & !3;
        if self.resources.lock().rx.is_dma() {
            unloaded += (rx_frame_len(rx.last_status[1]) + 2 + 3) & !3;
        }
        rx.overrun = Some(OverrunRecovery { unloaded });
        warn!("[LAN911X] Rx data FIFO overrun, draining {} bytes in", unloaded);
    }

    /// Dump what is left in the FIFOs and restart the receiver
    fn finish_overrun(&self, rx: &mut RxState) {
        let mut stopped = false;
        for _ in 0..RX_STOP_POLLS {
            if self.lan.read(INT_STS) & INT_RXSTOP != 0 {
                stopped = true;
                break;
            }
            self.platform.delay_us(1);
        }
        if !stopped {
            warn!("[LAN911X] overrun recovery: receiver did not report RXSTOP");
        }
        self.lan.write(INT_STS, INT_RXSTOP);

        let rx_cfg = self.lan.read(RX_CFG);
        self.lan.write(RX_CFG, rx_cfg & !RX_CFG_RX_END_ALGN);
        self.lan.set_bits(RX_CFG, RX_CFG_RX_DUMP);
        let mut dumped = false;
        for _ in 0..RX_DUMP_POLLS {
            if self.lan.read(RX_CFG) & RX_CFG_RX_DUMP == 0 {
                dumped = true;
                break;
            }
            self.platform.delay_us(1);
        }
        if !dumped {
            warn!("[LAN911X] overrun recovery: RX_DUMP did not complete");
        }
        self.lan.write(RX_CFG, rx_cfg);

        bump(&mut self.stats.lock().rx_dump_count, 1);
        self.lan.write(INT_STS, INT_RDFL);
        if let Err(e) = self.lan.receiver_on() {
            warn!("[LAN911X] overrun recovery: receiver not restarted: {}", e);
        }
        rx.overrun = None;
        info!("[LAN911X] Rx overrun recovered");
    }

    // ========================================================================
    // Status FIFO
    // ========================================================================

    /// Next status word the engine may consume
    ///
    /// `None` when the FIFO is empty, flow control or congestion holds the
    /// rest back, or overrun recovery has reached the point where the
    /// remainder is dumped.
    fn pop_rx_status(&self, rx: &mut RxState) -> Option<u32> {
        let pending = self.lan.read(RX_FIFO_INF) & RX_FIFO_INF_RXSUSED != 0;

        if rx.congested && pending {
            // Edge-triggered interrupt controllers need a fresh edge later
            self.lan.pulse_interrupt_enable();
            return None;
        }
        if !pending {
            if rx.overrun.is_some() {
                self.finish_overrun(rx);
            }
            return None;
        }

        let overrun_bit = self.chip.overrun_interrupt();
        if self.lan.read(INT_STS) & overrun_bit != 0 {
            self.lan.write(INT_STS, overrun_bit);
            self.handle_overrun(rx);
        }

        if !rx.flow.admits() {
            return None;
        }

        let status = self.lan.read(RX_STATUS_FIFO);
        rx.remember(status);
        let len = rx_frame_len(status);

        if let Some(recovery) = rx.overrun.as_mut() {
            let bytes = (len + 2 + 3) & !3;
            if recovery.unloaded + bytes >= self.config.rx_data_fifo_size() - OVERRUN_MARGIN {
                // This frame may be the corrupted one
                self.finish_overrun(rx);
                return None;
            }
            recovery.unloaded += bytes;
        }

        if rx.flow.account(len) {
            self.lan.disable_interrupts(rx.interrupts);
            bump(&mut self.stats.lock().rx_burst_pauses, 1);
        }
        Some(status)
    }

    // ========================================================================
    // Data FIFO
    // ========================================================================

    /// Skip the rest of the frame at the head of the data FIFO
    fn fast_forward(&self, words: u32) {
        bump(&mut self.stats.lock().rx_fast_forwards, 1);

        if words >= FAST_FORWARD_MIN_WORDS && self.chip.hardware_fast_forward() {
            self.lan.write(RX_DP_CTRL, words | RX_DP_CTRL_FFWD_BUSY);
            for _ in 0..FAST_FORWARD_POLLS {
                if self.lan.read(RX_DP_CTRL) & RX_DP_CTRL_FFWD_BUSY == 0 {
                    return;
                }
                self.platform.delay_us(1);
            }
            warn!("[LAN911X] Rx fast forward timed out");
        } else {
            for _ in 0..words {
                self.lan.read(RX_DATA_FIFO);
            }
        }
    }

    fn read_data_fifo(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_exact_mut(4) {
            chunk.copy_from_slice(&self.lan.read(RX_DATA_FIFO).to_le_bytes());
        }
    }

    /// Pass a frame up; true when the host asked for the drain to stop
    fn hand_off(&self, frame: SkBuff) -> bool {
        let congested = self.platform.deliver(frame) == RxVerdict::Congested;
        if congested {
            bump(&mut self.stats.lock().rx_congested, 1);
        }
        congested
    }

    // ========================================================================
    // Drain
    // ========================================================================

    fn process_packets(&self) {
        self.rx.lock().congested = false;
        let strategy = self.resources.lock().rx;
        match strategy {
            TransferStrategy::Pio => self.process_pio(),
            TransferStrategy::Dma { channel } => self.process_dma(&mut self.rx.lock(), channel),
        }
        self.lan.write(INT_STS, INT_RSFL);
    }

    fn process_pio(&self) {
        self.lan.write(RX_CFG, RX_CFG_PIO);
        while let Some(received) = self.pio_next() {
            if let Some(frame) = received {
                if self.hand_off(frame) {
                    self.rx.lock().congested = true;
                }
            }
        }
    }

    /// Consume one status word and its data under the Rx state lock
    ///
    /// `None` once the drain is over, `Some(None)` for a skipped frame.
    fn pio_next(&self) -> Option<Option<SkBuff>> {
        let mut rx = self.rx.lock();
        let status = self.pop_rx_status(&mut rx)?;
        let len = rx_frame_len(status);
        let words = pio_words(len);
        let bad = count_rx_errors(&mut self.stats.lock(), status);

        if !bad {
            let payload = len.saturating_sub(4);
            match frame_buffer(words as usize * 4, PIO_HEADROOM, payload as usize) {
                Ok(mut frame) => {
                    {
                        let mut stats = self.stats.lock();
                        bump(&mut stats.rx_packets, 1);
                        bump(&mut stats.rx_bytes, payload);
                    }
                    self.read_data_fifo(frame.buffer_mut());
                    return Some(Some(frame));
                }
                Err(e) => {
                    warn!("[LAN911X] no buffer for {} byte frame: {}", len, e);
                    bump(&mut self.stats.lock().rx_dropped, 1);
                }
            }
        }
        self.fast_forward(words);
        Some(None)
    }

    fn process_dma(&self, rx: &mut RxState, channel: u32) {
        let cache_line = self.config.cache_line_size;
        self.lan.write(
            RX_CFG,
            if cache_line == 16 { RX_CFG_DMA_16 } else { RX_CFG_DMA_32 },
        );

        let batch = self.chip.rx_dma_batch();
        let mut frames = Vec::with_capacity(batch);
        let mut segments = Vec::with_capacity(batch);
        let mut drop_len = None;

        while frames.len() < batch {
            let Some(status) = self.pop_rx_status(rx) else {
                break;
            };
            let len = rx_frame_len(status);
            let bad = count_rx_errors(&mut self.stats.lock(), status);

            // A bad frame ends the batch; it is skipped once the data ahead
            // of it has been transferred
            let buffer = if bad {
                None
            } else {
                let payload = len.saturating_sub(4) as usize;
                frame_buffer(len as usize + 2 * cache_line, cache_line - HEADER_SIZE, payload)
                    .map_err(|e| warn!("[LAN911X] no buffer for {} byte frame: {}", len, e))
                    .ok()
            };
            let Some(frame) = buffer else {
                bump(&mut self.stats.lock().rx_dropped, 1);
                drop_len = Some(len);
                break;
            };

            {
                let mut stats = self.stats.lock();
                bump(&mut stats.rx_packets, 1);
                bump(&mut stats.rx_bytes, len.saturating_sub(4));
            }
            segments.push(DmaSegment {
                addr: frame.buffer_addr(),
                len: dma_transfer_len(len, cache_line as u32) as usize,
            });
            frames.push(frame);
        }

        if !frames.is_empty() {
            self.lan.disable_interrupts(rx.interrupts);
            for segment in &segments {
                self.platform.cache_purge(segment.addr, segment.len);
            }
            rx.dma_in_flight = frames;
            rx.drop_after_dma = drop_len;
            if let Err(e) = self.platform.start_rx_dma(channel, &segments) {
                warn!("[LAN911X] Rx DMA start failed: {}", e);
            }
        } else if let Some(len) = drop_len {
            self.lan.write(RX_CFG, RX_CFG_PIO);
            self.fast_forward(pio_words(len));
        }
    }

    /// DMA engine finished the scatter-gather batch
    pub fn on_rx_dma_complete(&self) {
        let mut rx = self.rx.lock();
        let frames = core::mem::take(&mut rx.dma_in_flight);
        if frames.is_empty() {
            warn!("[LAN911X] Rx DMA completion with nothing in flight");
        }
        for frame in frames {
            if self.hand_off(frame) {
                rx.congested = true;
            }
        }

        if let Some(len) = rx.drop_after_dma.take() {
            self.lan.write(RX_CFG, RX_CFG_PIO);
            self.fast_forward(pio_words(len));
        }
        self.lan.enable_interrupts(rx.interrupts);
    }

    /// Bounded wait for an Rx DMA batch in flight, used while stopping
    ///
    /// A batch that never lands is aborted and its buffers counted as
    /// dropped.
    pub(super) fn wait_rx_dma_complete(&self, channel: u32) {
        for _ in 0..RX_DMA_WAIT_POLLS {
            if !self.rx.lock().dma_in_flight() {
                return;
            }
            self.platform.delay_us(10);
        }
        warn!("[LAN911X] timed out waiting for Rx DMA to complete, aborting");
        self.platform.abort_dma(channel);

        let mut rx = self.rx.lock();
        let reclaimed = core::mem::take(&mut rx.dma_in_flight);
        rx.drop_after_dma = None;
        bump(&mut self.stats.lock().rx_dropped, reclaimed.len() as u32);
    }

    // ========================================================================
    // Flow Control
    // ========================================================================

    /// `MeasureRxThroughput` expiry: close the window and decide
    pub(super) fn measure_rx_throughput(&self) {
        let mut rx = self.rx.lock();
        let outcome = rx.flow.end_window();
        match outcome {
            WindowOutcome::Activated => {
                info!("[LAN911X] Rx flow control on");
                bump(&mut self.stats.lock().rx_flow_activations, 1);
                let period = rx.flow.parameters().burst_period;
                self.schedule_gpt(GptCallback::RestartBurst, period);
            }
            WindowOutcome::Deactivated => info!("[LAN911X] Rx flow control off"),
            WindowOutcome::Steady | WindowOutcome::Idle => {}
        }
        if outcome.keeps_measuring() {
            self.schedule_gpt(GptCallback::MeasureRxThroughput, MEASUREMENT_PERIOD);
        }
    }

    /// `RestartBurst` expiry: open the next burst
    pub(super) fn restart_rx_burst(&self) {
        let mut rx = self.rx.lock();
        if rx.flow.restart_burst() {
            let period = rx.flow.parameters().burst_period;
            self.schedule_gpt(GptCallback::RestartBurst, period);
        }
        self.lan.enable_interrupts(rx.interrupts);
    }

    pub fn flow_control(&self) -> FlowControlSnapshot {
        self.rx.lock().flow.snapshot()
    }

    /// Retune flow control
    ///
    /// Refused with `InvalidConfiguration` while flow control is active.
    pub fn set_flow_parameters(
        &self,
        parameters: FlowControlParameters,
        max_work_load: Option<u32>,
    ) -> Result<(), NetworkError> {
        self.rx.lock().flow.set_parameters(parameters, max_work_load)
    }
}
