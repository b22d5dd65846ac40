//! Socket Buffer (sk_buff) - Linux-inspired frame buffer
//!
//! `SkBuff` is the unit that moves between the controller and the host
//! frame queue. The receive engine allocates one per frame, fills the raw
//! buffer straight from the Rx data FIFO (by PIO or DMA) and then narrows
//! the data window past the chip's alignment padding. The transmit engine
//! takes ownership of one per outbound frame and keeps it alive until the
//! DMA engine reports completion.
//!
//! # Layout
//!
//! ```text
//! ┌──────────┬─────────────────────────────┬──────────┐
//! │ headroom │            data             │ tailroom │
//! └──────────┴─────────────────────────────┴──────────┘
//! 0          data                          tail       capacity
//! ```
//!
//! `reserve()` grows the headroom of an empty buffer, `put()` appends to
//! the data window, `push()`/`pull()` move the front of the window.
//!
//! # References
//!
//! - Linux kernel sk_buff: <https://docs.kernel.org/networking/skbuff.html>

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// Largest buffer the receive engine ever asks for
/// 1518 byte frame + 2 cache lines of alignment slack, rounded up
pub const MAX_PACKET_SIZE: usize = 2048;

pub struct SkBuff {
    /// Backing storage, fixed size for the buffer's whole life
    data: Box<[u8]>,

    headers: SkBuffHeaders,
}

/// Offsets into the backing buffer
#[derive(Debug, Clone, Copy)]
struct SkBuffHeaders {
    /// Start of the current data window
    data: usize,

    /// End of the current data window
    tail: usize,
}

/// Errors that can occur during sk_buff operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkBuffError {
    /// Heap allocation failed (out of memory)
    AllocationFailed,

    /// Requested size exceeds MAX_PACKET_SIZE
    PacketTooLarge,

    /// Not enough headroom to push header
    InsufficientHeadroom,

    /// Not enough tailroom to grow the data window
    InsufficientTailroom,

    /// Not enough data to pull header
    InsufficientData,
}

impl fmt::Display for SkBuffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "heap allocation failed"),
            Self::PacketTooLarge => write!(f, "packet exceeds maximum size"),
            Self::InsufficientHeadroom => write!(f, "insufficient headroom for header"),
            Self::InsufficientTailroom => write!(f, "insufficient tailroom for data"),
            Self::InsufficientData => write!(f, "insufficient data to pull header"),
        }
    }
}

impl SkBuff {
    /// Allocate an empty, zero-filled buffer of `capacity` bytes
    ///
    /// Allocation failure is reported instead of aborting, so the receive
    /// path can count a drop and fast-forward past the frame.
    pub fn alloc(capacity: usize) -> Result<Self, SkBuffError> {
        if capacity > MAX_PACKET_SIZE {
            return Err(SkBuffError::PacketTooLarge);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| SkBuffError::AllocationFailed)?;
        storage.resize(capacity, 0);

        Ok(Self {
            data: storage.into_boxed_slice(),
            headers: SkBuffHeaders { data: 0, tail: 0 },
        })
    }

    /// Allocate a buffer holding a copy of `frame`
    pub fn from_slice(frame: &[u8]) -> Result<Self, SkBuffError> {
        let mut skb = Self::alloc(frame.len())?;
        skb.put(frame.len())?.copy_from_slice(frame);
        Ok(skb)
    }

    /// Move the (empty) data window `len` bytes into the buffer
    pub fn reserve(&mut self, len: usize) -> Result<(), SkBuffError> {
        if self.headers.tail + len > self.data.len() {
            return Err(SkBuffError::InsufficientTailroom);
        }
        debug_assert_eq!(self.headers.data, self.headers.tail, "reserve on non-empty skb");

        self.headers.data += len;
        self.headers.tail += len;
        Ok(())
    }

    /// Grow the data window by `len` bytes at the tail
    pub fn put(&mut self, len: usize) -> Result<&mut [u8], SkBuffError> {
        if self.headers.tail + len > self.data.len() {
            return Err(SkBuffError::InsufficientTailroom);
        }

        let start = self.headers.tail;
        self.headers.tail += len;
        Ok(&mut self.data[start..self.headers.tail])
    }

    /// Strip `len` bytes from the front of the data window
    pub fn pull(&mut self, len: usize) -> Result<(), SkBuffError> {
        if self.headers.data + len > self.headers.tail {
            return Err(SkBuffError::InsufficientData);
        }

        self.headers.data += len;
        Ok(())
    }

    /// Extend the data window `len` bytes toward the head
    pub fn push(&mut self, len: usize) -> Result<&mut [u8], SkBuffError> {
        if self.headers.data < len {
            return Err(SkBuffError::InsufficientHeadroom);
        }

        self.headers.data -= len;
        let start = self.headers.data;
        Ok(&mut self.data[start..start + len])
    }

    /// Current data window
    pub fn data(&self) -> &[u8] {
        &self.data[self.headers.data..self.headers.tail]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.headers.data..self.headers.tail]
    }

    /// Whole backing buffer, regardless of the data window
    ///
    /// The receive path reads FIFO words here before it knows where the
    /// frame starts.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bus address of the first byte of the backing buffer
    pub fn buffer_addr(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Bus address of the first byte of the data window
    pub fn data_addr(&self) -> usize {
        self.buffer_addr() + self.headers.data
    }

    pub fn len(&self) -> usize {
        self.headers.tail - self.headers.data
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn headroom(&self) -> usize {
        self.headers.data
    }

    pub fn tailroom(&self) -> usize {
        self.data.len() - self.headers.tail
    }
}

impl fmt::Debug for SkBuff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkBuff")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
