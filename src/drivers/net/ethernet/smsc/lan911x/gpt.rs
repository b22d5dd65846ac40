//! General purpose timer multiplexer
//!
//! The LAN911x has one GPT: a 16-bit countdown in 100 µs units that raises
//! INT_STS.GPT when it expires. The driver needs more than one deferred
//! callback in flight (flow-control measurement, burst restart, multicast
//! completion), so `GptScheduler` keeps a small fixed arena of slots and
//! always arms the hardware for the nearest deadline.
//!
//! ## Time base
//!
//! Deadlines are absolute FREE_RUN values (25 MHz, so one GPT unit is 2500
//! ticks). FREE_RUN wraps every ~172 s; every comparison goes through
//! [`ticks_until`], which subtracts with wrapping and reads the result as
//! signed. That stays correct as long as no deadline is more than 2^31
//! ticks (~86 s) away, which `MAX_DELAY_UNITS` enforces.
//!
//! ## Invariant
//!
//! Outside of `on_timer_interrupt`, the hardware is armed iff a slot is
//! populated, and `armed` names a slot holding the minimum deadline.
//!
//! ## Locking
//!
//! The slot table has its own IRQ-saving lock, separate from the MAC/PHY
//! lock. Callbacks run with it released, so they may schedule again.

use super::regs::*;
use crate::sync::Mutex;
use core::fmt;
use log::warn;

/// Number of callbacks that can be pending at once
pub const GPT_SLOTS: usize = 3;

/// FREE_RUN ticks per GPT unit (25 MHz / 10 kHz)
pub const TICKS_PER_UNIT: u32 = 2500;

/// A slot this close to its deadline fires with the current interrupt
pub const FIRE_TOLERANCE: i32 = (TICKS_PER_UNIT / 2) as i32;

/// Longest delay whose deadline still compares correctly after wrap
pub const MAX_DELAY_UNITS: u32 = i32::MAX as u32 / TICKS_PER_UNIT;

/// Deferred work the scheduler can run
///
/// Callbacks are matched by identity when cancelled, so each variant
/// should only ever be scheduled once at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptCallback {
    /// End of a flow-control measurement window
    MeasureRxThroughput,
    /// End of a flow-control pause; admit the next burst
    RestartBurst,
    /// Receiver should be idle now; apply the pending multicast filter
    CompleteMulticastUpdate,
}

/// The hardware behind the scheduler
pub trait GptTimer {
    /// Current FREE_RUN value
    fn now(&self) -> u32;
    /// Program the countdown to expire `ticks` FREE_RUN ticks from now
    fn arm(&self, ticks: i32);
    /// Stop the countdown and discard any pending expiry
    fn disarm(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptError {
    /// All slots are in use
    NoFreeSlot,
    /// A delay of zero would never be armed
    ZeroDelay,
    /// Delay would not survive FREE_RUN wraparound
    DelayTooLong,
    /// Cancel found no slot holding the callback
    NotScheduled,
}

impl fmt::Display for GptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSlot => write!(f, "no free GPT slot"),
            Self::ZeroDelay => write!(f, "zero GPT delay"),
            Self::DelayTooLong => write!(f, "GPT delay exceeds {} units", MAX_DELAY_UNITS),
            Self::NotScheduled => write!(f, "callback not scheduled"),
        }
    }
}

/// Signed distance from `now` to `deadline`, negative once it has passed
#[inline]
pub fn ticks_until(deadline: u32, now: u32) -> i32 {
    deadline.wrapping_sub(now) as i32
}

#[derive(Debug, Clone, Copy)]
struct GptSlot {
    callback: GptCallback,
    deadline: u32,
}

struct SlotTable {
    slots: [Option<GptSlot>; GPT_SLOTS],
    /// Slot the hardware countdown was armed for
    armed: Option<usize>,
    /// Set while `on_timer_interrupt` is firing callbacks
    dispatching: bool,
}

impl SlotTable {
    /// Slot with the smallest deadline relative to `now`; first wins ties
    fn nearest(&self, now: u32) -> Option<(usize, i32)> {
        let mut best: Option<(usize, i32)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                let span = ticks_until(slot.deadline, now);
                if best.is_none_or(|(_, best_span)| span < best_span) {
                    best = Some((index, span));
                }
            }
        }
        best
    }

    fn rearm(&mut self, timer: &impl GptTimer, now: u32) {
        match self.nearest(now) {
            Some((index, span)) => {
                self.armed = Some(index);
                timer.arm(span);
            }
            None => {
                self.armed = None;
                timer.disarm();
            }
        }
    }
}

pub struct GptScheduler {
    table: Mutex<SlotTable>,
}

#[allow(clippy::new_without_default)] // Default would hide that the hardware must start disarmed
impl GptScheduler {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(SlotTable {
                slots: [None; GPT_SLOTS],
                armed: None,
                dispatching: false,
            }),
        }
    }

    /// Run `callback` after `delay_units` GPT units (100 µs each)
    ///
    /// Returns the slot index. The hardware is only re-armed when the new
    /// deadline is strictly earlier than the armed one.
    pub fn schedule(
        &self,
        timer: &impl GptTimer,
        callback: GptCallback,
        delay_units: u32,
    ) -> Result<usize, GptError> {
        if delay_units == 0 {
            return Err(GptError::ZeroDelay);
        }
        if delay_units > MAX_DELAY_UNITS {
            return Err(GptError::DelayTooLong);
        }

        let mut table = self.table.lock();
        let now = timer.now();

        let Some(index) = table.slots.iter().position(Option::is_none) else {
            warn!("[GPT] no free slot for {:?}", callback);
            return Err(GptError::NoFreeSlot);
        };

        let deadline = now.wrapping_add(delay_units * TICKS_PER_UNIT);
        table.slots[index] = Some(GptSlot { callback, deadline });

        // The dispatcher re-arms once it is done.
        if table.dispatching {
            return Ok(index);
        }

        let span = ticks_until(deadline, now);
        let earlier = match table.armed.and_then(|armed| table.slots[armed]) {
            Some(armed) => span < ticks_until(armed.deadline, now),
            None => true,
        };
        if earlier {
            table.armed = Some(index);
            timer.arm(span);
        }

        Ok(index)
    }

    /// Drop every pending slot running `callback`
    ///
    /// Cancelling the armed slot moves the arm to the next-nearest
    /// deadline, or disarms the timer when nothing is left.
    pub fn cancel(&self, timer: &impl GptTimer, callback: GptCallback) -> Result<(), GptError> {
        let mut table = self.table.lock();

        let mut found = false;
        let mut was_armed = false;
        for index in 0..GPT_SLOTS {
            if table.slots[index].is_some_and(|slot| slot.callback == callback) {
                table.slots[index] = None;
                found = true;
                was_armed |= table.armed == Some(index);
            }
        }

        if !found {
            return Err(GptError::NotScheduled);
        }

        if was_armed {
            table.armed = None;
            if !table.dispatching {
                let now = timer.now();
                table.rearm(timer, now);
            }
        }

        Ok(())
    }

    /// Fire every due slot, nearest first, then re-arm
    ///
    /// `fire` runs with the slot lock released. Slots scheduled from inside
    /// `fire` are measured against the time this interrupt started, so
    /// they never run in the same pass.
    pub fn on_timer_interrupt(&self, timer: &impl GptTimer, mut fire: impl FnMut(GptCallback)) {
        let now = {
            let mut table = self.table.lock();
            table.dispatching = true;
            table.armed = None;
            timer.now()
        };

        loop {
            let due = {
                let mut table = self.table.lock();
                let mut best: Option<(usize, i32)> = None;
                for (index, slot) in table.slots.iter().enumerate() {
                    if let Some(slot) = slot {
                        let span = ticks_until(slot.deadline, now);
                        if span < FIRE_TOLERANCE && best.is_none_or(|(_, b)| span < b) {
                            best = Some((index, span));
                        }
                    }
                }
                best.and_then(|(index, _)| table.slots[index].take())
            };

            match due {
                Some(slot) => fire(slot.callback),
                None => break,
            }
        }

        let mut table = self.table.lock();
        table.dispatching = false;
        let now = timer.now();
        table.rearm(timer, now);
    }

    pub fn is_scheduled(&self, callback: GptCallback) -> bool {
        self.table
            .lock()
            .slots
            .iter()
            .flatten()
            .any(|slot| slot.callback == callback)
    }

    /// Deadline of the slot the hardware is armed for
    pub fn armed_deadline(&self) -> Option<u32> {
        let table = self.table.lock();
        table
            .armed
            .and_then(|index| table.slots[index])
            .map(|slot| slot.deadline)
    }

    /// Number of populated slots
    pub fn pending(&self) -> usize {
        self.table.lock().slots.iter().flatten().count()
    }

    /// Empty every slot and stop the hardware
    pub fn reset(&self, timer: &impl GptTimer) {
        let mut table = self.table.lock();
        table.slots = [None; GPT_SLOTS];
        table.armed = None;
        timer.disarm();
    }

    #[cfg(test)]
    fn deadlines(&self) -> std::vec::Vec<u32> {
        self.table
            .lock()
            .slots
            .iter()
            .flatten()
            .map(|slot| slot.deadline)
            .collect()
    }
}

/// GPT_CFG load for a countdown of `ticks`, rounded to the nearest unit
pub fn load_for_ticks(ticks: i32) -> u32 {
    let ticks = ticks.max(0) as u32;
    ((ticks + TICKS_PER_UNIT / 2) / TICKS_PER_UNIT).min(GPT_CFG_GPT_LOAD)
}
