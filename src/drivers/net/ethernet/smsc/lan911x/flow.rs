//! Adaptive receive flow control
//!
//! The driver paces its own receive processing. Every received frame adds
//! its payload plus a fixed per-packet cost to a workload counter. Once per
//! measurement window the workload is compared against the configured
//! maximum:
//!
//! ```text
//!   workload >= 104% of max  ->  activate:  admit bursts of burst_max,
//!                                           pause until the next burst period
//!   workload <=  75% of max  ->  deactivate
//! ```
//!
//! While active, status words are only consumed inside a burst. When a
//! burst has used up its share, the Rx interrupts are masked until the
//! `RestartBurst` GPT callback opens the next one. Frames left in the chip
//! meanwhile are what pushes back on the link partner.
//!
//! This module only keeps the arithmetic; the receive engine owns the
//! registers and the GPT scheduling.

use super::config::FlowOverrides;
use crate::drivers::net::NetworkError;
use log::warn;

/// Length of one measurement window, in GPT units
pub const MEASUREMENT_PERIOD: u32 = 1000;

/// Workload percentage of max at or above which flow control activates
pub const ACTIVATION_PERCENT: u64 = 104;

/// Workload percentage of max at or below which flow control deactivates
pub const DEACTIVATION_PERCENT: u64 = 75;

/// Substituted for a burst period of zero
pub const DEFAULT_BURST_PERIOD: u32 = 100;

/// Tuning for the flow-control algorithm
///
/// Throughput and packet counts are per measurement window, the burst
/// period is in GPT units, `int_deas` in 10 µs units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlParameters {
    pub max_throughput: u32,
    pub max_packet_count: u32,
    pub packet_cost: u32,
    pub burst_period: u32,
    pub int_deas: u8,
}

impl FlowControlParameters {
    /// Defaults when Rx status words are drained by PIO
    pub const fn pio_defaults() -> Self {
        Self {
            max_throughput: 700_000,
            max_packet_count: 1000,
            packet_cost: 128,
            burst_period: 100,
            int_deas: 0x18,
        }
    }

    /// Defaults when frames are pulled by scatter-gather DMA
    pub const fn dma_defaults() -> Self {
        Self {
            max_throughput: 1_000_000,
            max_packet_count: 1500,
            packet_cost: 96,
            burst_period: 100,
            int_deas: 0x18,
        }
    }

    pub fn with_overrides(mut self, overrides: &FlowOverrides) -> Self {
        if let Some(value) = overrides.max_throughput {
            self.max_throughput = value;
        }
        if let Some(value) = overrides.max_packet_count {
            self.max_packet_count = value;
        }
        if let Some(value) = overrides.packet_cost {
            self.packet_cost = value;
        }
        if let Some(value) = overrides.burst_period {
            self.burst_period = value;
        }
        if let Some(value) = overrides.int_deas {
            self.int_deas = value;
        }
        self
    }

    /// Workload of a window that hits both throughput and packet limits
    pub fn derived_max_work_load(&self) -> u32 {
        self.max_throughput
            .saturating_add(self.max_packet_count.saturating_mul(self.packet_cost))
    }
}

/// What the end of a measurement window decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Flow control switched on; the first burst is open
    Activated,
    /// Flow control switched off
    Deactivated,
    /// Traffic seen, no state change
    Steady,
    /// Nothing received; flow control is off and measuring stops until
    /// the next Rx interrupt
    Idle,
}

impl WindowOutcome {
    /// Whether another window should be measured
    pub fn keeps_measuring(self) -> bool {
        self != WindowOutcome::Idle
    }
}

/// Read-only view used by the diagnostic surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlSnapshot {
    pub parameters: FlowControlParameters,
    pub measured_max_throughput: u32,
    pub measured_max_packet_count: u32,
    pub max_work_load: u32,
    pub burst_max_work_load: u32,
    pub active: bool,
}

/// Flow-control parameters plus the live per-window state
#[derive(Debug)]
pub struct FlowControl {
    parameters: FlowControlParameters,
    max_work_load: u32,
    burst_max_work_load: u32,

    throughput: u32,
    packet_count: u32,
    work_load: u32,
    burst_work_load: u32,

    measured_max_throughput: u32,
    measured_max_packet_count: u32,

    active: bool,
    burst_active: bool,
    measuring: bool,
}

impl FlowControl {
    /// `max_work_load` overrides the value derived from `parameters`
    pub fn new(parameters: FlowControlParameters, max_work_load: Option<u32>) -> Self {
        let mut flow = Self {
            parameters,
            max_work_load: 0,
            burst_max_work_load: 0,
            throughput: 0,
            packet_count: 0,
            work_load: 0,
            burst_work_load: 0,
            measured_max_throughput: 0,
            measured_max_packet_count: 0,
            active: false,
            burst_active: false,
            measuring: false,
        };
        flow.apply(parameters, max_work_load);
        flow
    }

    fn apply(&mut self, mut parameters: FlowControlParameters, max_work_load: Option<u32>) {
        if parameters.burst_period == 0 {
            warn!(
                "[LAN911X] burst_period of 0 is not allowed, using {}",
                DEFAULT_BURST_PERIOD
            );
            parameters.burst_period = DEFAULT_BURST_PERIOD;
        }

        self.parameters = parameters;
        self.max_work_load = max_work_load.unwrap_or_else(|| parameters.derived_max_work_load());
        self.burst_max_work_load =
            (self.max_work_load as u64 * parameters.burst_period as u64 / MEASUREMENT_PERIOD as u64)
                as u32;
    }

    /// Replace the tuning; only allowed while flow control is inactive
    pub fn set_parameters(
        &mut self,
        parameters: FlowControlParameters,
        max_work_load: Option<u32>,
    ) -> Result<(), NetworkError> {
        if self.active {
            return Err(NetworkError::InvalidConfiguration);
        }
        self.apply(parameters, max_work_load);
        Ok(())
    }

    pub fn parameters(&self) -> FlowControlParameters {
        self.parameters
    }

    pub fn max_work_load(&self) -> u32 {
        self.max_work_load
    }

    pub fn burst_max_work_load(&self) -> u32 {
        self.burst_max_work_load
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_burst_active(&self) -> bool {
        self.burst_active
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Whether a status word may be consumed right now
    pub fn admits(&self) -> bool {
        !self.active || self.burst_active
    }

    /// Begin measuring if not already
    ///
    /// Returns true when a new window starts and its end has to be
    /// scheduled.
    pub fn start_window(&mut self) -> bool {
        if self.measuring {
            return false;
        }
        self.measuring = true;
        self.reset_window();
        true
    }

    fn reset_window(&mut self) {
        self.throughput = 0;
        self.packet_count = 0;
        self.work_load = 0;
    }

    /// Account for one consumed status word of `frame_len` bytes (with FCS)
    ///
    /// Returns true when this frame used up the current burst; the caller
    /// must mask the Rx interrupts until the burst restarts.
    pub fn account(&mut self, frame_len: u32) -> bool {
        let payload = frame_len.saturating_sub(4);
        let cost = payload.saturating_add(self.parameters.packet_cost);

        self.throughput = self.throughput.saturating_add(payload);
        self.packet_count = self.packet_count.saturating_add(1);
        self.work_load = self.work_load.saturating_add(cost);

        if !self.active {
            return false;
        }

        self.burst_work_load = self.burst_work_load.saturating_add(cost);
        if self.burst_active && self.burst_work_load >= self.burst_max_work_load {
            self.burst_active = false;
            return true;
        }
        false
    }

    /// Close the measurement window and decide
    pub fn end_window(&mut self) -> WindowOutcome {
        self.measured_max_throughput = self.measured_max_throughput.max(self.throughput);
        self.measured_max_packet_count = self.measured_max_packet_count.max(self.packet_count);

        if self.throughput == 0 {
            if self.max_work_load != 0 {
                self.active = false;
            }
            self.measuring = false;
            return WindowOutcome::Idle;
        }

        let work_load = self.work_load as u64 * 100;
        let max = self.max_work_load as u64;
        let mut outcome = WindowOutcome::Steady;

        if max != 0 {
            if !self.active {
                if work_load >= max * ACTIVATION_PERCENT {
                    self.active = true;
                    self.burst_active = true;
                    self.burst_work_load = 0;
                    outcome = WindowOutcome::Activated;
                }
            } else if work_load <= max * DEACTIVATION_PERCENT {
                self.active = false;
                outcome = WindowOutcome::Deactivated;
            }
        }

        self.reset_window();
        outcome
    }

    /// Open the next burst
    ///
    /// Returns true while flow control is still active, meaning another
    /// restart has to be scheduled one burst period out.
    pub fn restart_burst(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.burst_active = true;
        self.burst_work_load = self.burst_work_load.saturating_sub(self.burst_max_work_load);
        true
    }

    pub fn snapshot(&self) -> FlowControlSnapshot {
        FlowControlSnapshot {
            parameters: self.parameters,
            measured_max_throughput: self.measured_max_throughput,
            measured_max_packet_count: self.measured_max_packet_count,
            max_work_load: self.max_work_load,
            burst_max_work_load: self.burst_max_work_load,
            active: self.active,
        }
    }
}
