//! Platform services the controller depends on
//!
//! The LAN911x sits on a board bus; everything around it (delays, the
//! system DMA engine, the interrupt line, the host network stack's queue)
//! belongs to the platform. `Platform` is that seam. The controller never
//! blocks on any of it: DMA completion and timer expiry come back in as
//! calls on the controller (`on_rx_dma_complete`, `on_tx_dma_complete`,
//! `on_link_timer`, `run_deferred_rx`).

use crate::net::skbuff::SkBuff;
use core::fmt;

/// Which way a DMA channel moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Memory to the Tx data FIFO
    ToDevice,
    /// Rx data FIFO to memory
    FromDevice,
}

/// One contiguous memory region of a DMA transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    /// Bus address of the first byte
    pub addr: usize,
    /// Length in bytes, a whole number of cache lines
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Channel was never reserved or is not a valid channel number
    InvalidChannel,
    /// Engine refused the transfer
    Rejected,
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmaError::InvalidChannel => write!(f, "invalid DMA channel"),
            DmaError::Rejected => write!(f, "DMA transfer rejected"),
        }
    }
}

/// What the host stack did with a delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxVerdict {
    Accepted,
    /// Queued, but the stack is backed up; stop draining for now
    Congested,
}

/// How one data path moves frames, fixed at activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    Pio,
    Dma { channel: u32 },
}

impl TransferStrategy {
    pub fn is_dma(&self) -> bool {
        matches!(self, TransferStrategy::Dma { .. })
    }
}

/// Board services used by the controller
///
/// Every method may be called from interrupt context and must not block.
pub trait Platform {
    /// Busy-wait for `us` microseconds
    fn delay_us(&self, us: u32);

    // Host frame queue

    /// Hand a received frame to the network stack
    fn deliver(&self, frame: SkBuff) -> RxVerdict;
    /// Stop the stack from queueing more transmit frames
    fn stop_queue(&self);
    /// Let the stack queue transmit frames again
    fn wake_queue(&self);

    // DMA engine

    /// Reserve any free channel
    fn request_dma_channel(&self, direction: DmaDirection) -> Option<u32>;
    /// Reserve a specific channel; false if it does not exist or is taken
    #[must_use]
    fn reserve_dma_channel(&self, channel: u32, direction: DmaDirection) -> bool;
    fn release_dma_channel(&self, channel: u32);
    /// Write back and invalidate the data cache over a buffer
    fn cache_purge(&self, addr: usize, len: usize);
    /// Copy `segment` into the Tx data FIFO; completion calls `on_tx_dma_complete`
    fn start_tx_dma(&self, channel: u32, segment: DmaSegment) -> Result<(), DmaError>;
    /// Fill each segment in turn from the Rx data FIFO; completion calls
    /// `on_rx_dma_complete`
    fn start_rx_dma(&self, channel: u32, segments: &[DmaSegment]) -> Result<(), DmaError>;
    /// Stop whatever `channel` is transferring; no completion call follows
    fn abort_dma(&self, channel: u32);

    // Execution contexts

    /// Run `run_deferred_rx` soon, outside the interrupt handler
    fn schedule_deferred_rx(&self);
    /// Route the chip's interrupt line to `handle_interrupt`
    #[must_use = "the controller cannot run without its interrupt"]
    fn attach_irq(&self) -> bool;
    fn detach_irq(&self);
    /// Call `on_link_timer` once, `period_ms` from now
    fn arm_link_timer(&self, period_ms: u32);
    fn cancel_link_timer(&self);
}
