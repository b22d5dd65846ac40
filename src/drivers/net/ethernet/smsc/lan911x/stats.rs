//! Interface statistics
//!
//! Counters are 32 bits and wrap, like the net_device_stats they feed.

/// Packet and error counters kept by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub rx_packets: u32,
    pub rx_bytes: u32,
    pub rx_errors: u32,
    pub rx_dropped: u32,
    pub rx_crc_errors: u32,
    pub rx_length_errors: u32,
    pub multicast: u32,

    pub tx_packets: u32,
    pub tx_bytes: u32,
    pub tx_errors: u32,
    pub tx_aborted: u32,
    pub tx_carrier_errors: u32,
    pub collisions: u32,

    // Driver-internal
    /// Rx data FIFO overruns seen
    pub rx_overruns: u32,
    /// RX_DUMP cycles run by overrun recovery
    pub rx_dump_count: u32,
    /// Frames skipped with a fast-forward instead of being read
    pub rx_fast_forwards: u32,
    /// Measurement windows that switched flow control on
    pub rx_flow_activations: u32,
    /// Bursts that used up their share and masked the Rx interrupts
    pub rx_burst_pauses: u32,
    /// Frames the host queue accepted while signalling congestion
    pub rx_congested: u32,
}

/// Wrapping add for a statistics counter
#[inline]
pub(crate) fn bump(counter: &mut u32, amount: u32) {
    *counter = counter.wrapping_add(amount);
}
