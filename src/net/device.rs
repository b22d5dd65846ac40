//! smoltcp adapter for the LAN911x controller
//!
//! The controller pushes received frames at the host through
//! `Platform::deliver`; a host platform forwards them into a [`FrameQueue`],
//! and [`Lan911xDevice`] hands them to smoltcp one `receive()` at a time.
//! Transmit tokens copy smoltcp's frame into an `SkBuff` and pass it to
//! `Controller::send`.
//!
//! # Usage
//!
//! ```ignore
//! static RX_FRAMES: FrameQueue = FrameQueue::new();
//!
//! // Platform::deliver
//! fn deliver(&self, frame: SkBuff) -> RxVerdict {
//!     RX_FRAMES.push(frame)
//! }
//!
//! // poll loop
//! let mut device = Lan911xDevice::new(&controller, &RX_FRAMES);
//! iface.poll(now, &mut device, &mut sockets);
//! ```

use crate::drivers::net::ethernet::smsc::lan911x::Controller;
use crate::drivers::net::ethernet::smsc::lan911x::bus::RegisterBus;
use crate::drivers::net::ethernet::smsc::lan911x::platform::{Platform, RxVerdict};
use crate::net::ethernet::MAX_FRAME_SIZE;
use crate::net::skbuff::SkBuff;
use crate::sync::Mutex;
use alloc::collections::VecDeque;
use alloc::vec;
use log::{trace, warn};
use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

/// Frames held before `push` starts reporting congestion
pub const FRAME_QUEUE_HIGH_WATER: usize = 32;

/// Received frames waiting for the network stack
///
/// Filled from interrupt context and drained by the poll loop, so the
/// queue lock masks interrupts.
pub struct FrameQueue {
    frames: Mutex<VecDeque<SkBuff>>,
}

impl FrameQueue {
    pub const fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a frame; the frame is always kept
    pub fn push(&self, frame: SkBuff) -> RxVerdict {
        let mut frames = self.frames.lock();
        frames.push_back(frame);
        if frames.len() > FRAME_QUEUE_HIGH_WATER {
            RxVerdict::Congested
        } else {
            RxVerdict::Accepted
        }
    }

    pub fn pop(&self) -> Option<SkBuff> {
        self.frames.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// smoltcp view of one controller and its receive queue
pub struct Lan911xDevice<'a, B: RegisterBus, P: Platform> {
    controller: &'a Controller<B, P>,
    frames: &'a FrameQueue,
}

impl<'a, B: RegisterBus, P: Platform> Lan911xDevice<'a, B, P> {
    pub fn new(controller: &'a Controller<B, P>, frames: &'a FrameQueue) -> Self {
        Self { controller, frames }
    }
}

impl<B: RegisterBus, P: Platform> Device for Lan911xDevice<'_, B, P> {
    type RxToken<'t>
        = Lan911xRxToken
    where
        Self: 't;
    type TxToken<'t>
        = Lan911xTxToken<'t, B, P>
    where
        Self: 't;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = self.frames.pop()?;
        Some((
            Lan911xRxToken { frame },
            Lan911xTxToken {
                controller: self.controller,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if self.controller.queue_stopped() {
            return None;
        }
        Some(Lan911xTxToken {
            controller: self.controller,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = MAX_FRAME_SIZE;
        caps.max_burst_size = Some(1);
        caps
    }
}

pub struct Lan911xRxToken {
    frame: SkBuff,
}

impl phy::RxToken for Lan911xRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.frame.data_mut())
    }
}

pub struct Lan911xTxToken<'a, B: RegisterBus, P: Platform> {
    controller: &'a Controller<B, P>,
}

impl<B: RegisterBus, P: Platform> phy::TxToken for Lan911xTxToken<'_, B, P> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = match SkBuff::alloc(len) {
            Ok(frame) => frame,
            Err(e) => {
                // smoltcp still needs somewhere to build the frame
                warn!("[LAN911X] no Tx buffer for {} byte frame: {}", len, e);
                let mut scratch = vec![0u8; len];
                return f(&mut scratch);
            }
        };

        let result = match frame.put(len) {
            Ok(data) => f(data),
            Err(e) => {
                warn!("[LAN911X] Tx buffer setup failed: {}", e);
                let mut scratch = vec![0u8; len];
                return f(&mut scratch);
            }
        };

        if let Err(e) = self.controller.send(frame) {
            trace!("[LAN911X] smoltcp frame of {} bytes not sent: {}", len, e);
        }
        result
    }
}
