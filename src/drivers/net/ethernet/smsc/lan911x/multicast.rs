//! Receive address filtering
//!
//! The MAC filters multicast frames through a 64-bit hash table (HASHH and
//! HASHL) indexed by six bits of each destination address's CRC, plus the
//! PRMS/MCPAS/HPFILT mode bits in MAC_CR.
//!
//! Changing MAC_CR or the hash table while a frame is being received can
//! corrupt that frame on early silicon, so generations 0 and 1 stage the new
//! filter and apply it only once the receiver has stopped:
//!
//! ```text
//! set_multicast_filter ─▶ pending ─▶ SW interrupt ─▶ receiver off
//!                                                     │
//!            gen 1: RXSTOP within 200 µs ─────────────┼─▶ apply, receiver on
//!            gen 1: RXSTOP interrupt or GPT 1.8 ms ───┤
//!            gen 0: GPT 2 ms ─────────────────────────┘
//! ```
//!
//! Later parts take the new filter immediately.

use super::Controller;
use super::bus::RegisterBus;
use super::gpt::{GptCallback, GptError};
use super::mac::MacPhyGuard;
use super::platform::Platform;
use super::regs::*;
use crate::net::ethernet::MacAddress;
use core::sync::atomic::Ordering;
use log::{debug, warn};

/// 1 µs polls of INT_STS.RXSTOP before falling back to a deferred update
const RX_STOP_POLLS: u32 = 200;

/// GPT units to wait after an unsuccessful RXSTOP poll
const RX_STOP_FALLBACK_UNITS: u32 = 18;

/// GPT units generation 0 waits for the receiver, assuming a 10 Mbps link
const GENERATION0_SETTLE_UNITS: u32 = 20;

/// What the host wants the receive filter to pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticastFilter<'a> {
    /// Every frame
    Promiscuous,
    /// Every multicast frame
    AllMulticast,
    /// Multicast frames whose address hashes into the table
    List(&'a [MacAddress]),
    /// Only our own address and broadcast
    None,
}

/// MAC register values for one filter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    /// MAC_CR bits to set
    pub set: u32,
    /// MAC_CR bits to clear
    pub clear: u32,
    pub hash_high: u32,
    pub hash_low: u32,
}

impl FilterSettings {
    pub fn from_filter(filter: MulticastFilter<'_>) -> Self {
        let (set, clear) = match filter {
            MulticastFilter::Promiscuous => (MAC_CR_PRMS, MAC_CR_MCPAS | MAC_CR_HPFILT),
            MulticastFilter::AllMulticast => (MAC_CR_MCPAS, MAC_CR_PRMS | MAC_CR_HPFILT),
            MulticastFilter::List(addresses) if !addresses.is_empty() => {
                (MAC_CR_HPFILT, MAC_CR_PRMS | MAC_CR_MCPAS)
            }
            _ => (0, MAC_CR_PRMS | MAC_CR_MCPAS | MAC_CR_HPFILT),
        };

        let mut settings = Self {
            set,
            clear,
            hash_high: 0,
            hash_low: 0,
        };
        if let MulticastFilter::List(addresses) = filter {
            for address in addresses {
                let bit = hash_bit(address);
                if bit & 0x20 != 0 {
                    settings.hash_high |= 1 << (bit & 0x1F);
                } else {
                    settings.hash_low |= 1 << (bit & 0x1F);
                }
            }
        }
        settings
    }
}

/// Hash table bit (0..64) for a destination address
///
/// The top six bits of the Ethernet CRC, bit-reversed.
pub fn hash_bit(address: &MacAddress) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in address.as_bytes() {
        let mut data = byte as u32;
        for _ in 0..8 {
            let feedback = (crc ^ data) & 1;
            crc >>= 1;
            if feedback != 0 {
                crc ^= 0xEDB8_8320;
            }
            data >>= 1;
        }
    }
    (crc & 0x3F).reverse_bits() >> 26
}

/// How a new filter reaches the MAC on a given chip generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticastUpdateStrategy {
    /// Write MAC_CR and the hash table right away
    Immediate,
    /// Stop the receiver, poll RXSTOP, fall back to its interrupt or the GPT
    PollThenDefer,
    /// Stop the receiver and wait a fixed GPT delay
    DeferOnly,
}

impl MulticastUpdateStrategy {
    pub fn for_generation(generation: u8) -> Self {
        match generation {
            0 => Self::DeferOnly,
            1 => Self::PollThenDefer,
            _ => Self::Immediate,
        }
    }
}

impl<B: RegisterBus, P: Platform> Controller<B, P> {
    /// Replace the receive filter
    ///
    /// On generation 0/1 parts this only stages the settings; a second call
    /// before they are applied replaces them.
    pub fn set_multicast_filter(&self, filter: MulticastFilter<'_>) {
        let settings = FilterSettings::from_filter(filter);
        debug!(
            "[LAN911X] multicast filter set 0x{:08X} clear 0x{:08X} hash {:08X}:{:08X}",
            settings.set, settings.clear, settings.hash_high, settings.hash_low
        );

        let mut held = self.lan.acquire_mac_phy();
        match MulticastUpdateStrategy::for_generation(self.chip.generation()) {
            MulticastUpdateStrategy::Immediate => self.write_filter(&held, &settings),
            _ => {
                let already_pending = held.pending_filter.replace(settings).is_some();
                if !already_pending {
                    self.signal_software_interrupt();
                }
            }
        }
    }

    /// Whether a staged filter is still waiting for the receiver to stop
    pub fn multicast_update_pending(&self) -> bool {
        self.lan.acquire_mac_phy().pending_filter.is_some()
    }

    fn write_filter(&self, held: &MacPhyGuard<'_>, settings: &FilterSettings) {
        let written = self
            .lan
            .mac_write(held, HASHH, settings.hash_high)
            .and_then(|_| self.lan.mac_write(held, HASHL, settings.hash_low))
            .and_then(|_| self.lan.mac_modify(held, MAC_CR, settings.clear, settings.set));
        if let Err(e) = written {
            warn!("[LAN911X] multicast filter update {}", e);
        }
    }

    /// Stop the receiver so a staged filter can be applied
    fn begin_multicast_update(&self) {
        let mut held = self.lan.acquire_mac_phy();
        if let Err(e) = self.lan.receiver_off_held(&mut held) {
            // Receiver still running; apply in place
            warn!("[LAN911X] multicast update: receiver not stopped: {}", e);
            if let Some(settings) = held.pending_filter.take() {
                self.write_filter(&held, &settings);
            }
            return;
        }

        match MulticastUpdateStrategy::for_generation(self.chip.generation()) {
            MulticastUpdateStrategy::DeferOnly => {
                // RXSTOP is unreliable while overrun recovery may also have
                // the receiver off; assume 10 Mbps worst case
                self.schedule_multicast_completion(&mut held, GENERATION0_SETTLE_UNITS);
            }
            _ => {
                let mut stopped = false;
                for _ in 0..RX_STOP_POLLS {
                    if self.lan.read(INT_STS) & INT_RXSTOP != 0 {
                        stopped = true;
                        break;
                    }
                    self.platform.delay_us(1);
                }

                if stopped {
                    self.lan.write(INT_STS, INT_RXSTOP);
                    self.complete_multicast_update_held(&mut held);
                } else {
                    // Probably 10 Mbps. RXSTOP misses about 0.4% of stops in
                    // half duplex, so the GPT backs it up.
                    self.lan.enable_interrupts(INT_RXSTOP);
                    self.schedule_multicast_completion(&mut held, RX_STOP_FALLBACK_UNITS);
                }
            }
        }
    }

    /// Arm the completion; without a GPT slot the filter is applied now
    /// rather than leaving the receiver off
    fn schedule_multicast_completion(&self, held: &mut MacPhyGuard<'_>, units: u32) {
        if let Err(e) = self
            .gpt
            .schedule(&self.lan, GptCallback::CompleteMulticastUpdate, units)
        {
            warn!("[LAN911X] multicast completion not scheduled ({}), applying now", e);
            self.lan.disable_interrupts(INT_RXSTOP);
            self.complete_multicast_update_held(held);
        }
    }

    /// Apply the staged filter and release the receiver
    pub(super) fn complete_multicast_update(&self) {
        let mut held = self.lan.acquire_mac_phy();
        self.complete_multicast_update_held(&mut held);
    }

    fn complete_multicast_update_held(&self, held: &mut MacPhyGuard<'_>) {
        if let Some(settings) = held.pending_filter {
            self.write_filter(held, &settings);
            if let Err(e) = self.lan.receiver_on_held(held) {
                warn!("[LAN911X] multicast update: receiver not restarted: {}", e);
            }
            held.pending_filter = None;
        }
    }

    // ========================================================================
    // Interrupt Sources
    // ========================================================================

    /// Raise INT_STS.SW so the staged work runs in interrupt context
    pub(super) fn signal_software_interrupt(&self) {
        self.sw_int_seen.store(false, Ordering::Release);
        self.lan.enable_interrupts(INT_SW);
    }

    pub(super) fn handle_software_interrupt(&self, status: u32) -> bool {
        if status & INT_SW == 0 {
            return false;
        }
        self.lan.disable_interrupts(INT_SW);
        self.lan.write(INT_STS, INT_SW);
        self.sw_int_seen.store(true, Ordering::Release);

        if self.multicast_update_pending() {
            self.begin_multicast_update();
        }
        true
    }

    pub(super) fn handle_rx_stop(&self, status: u32) -> bool {
        if status & INT_RXSTOP == 0 {
            return false;
        }
        match self
            .gpt
            .cancel(&self.lan, GptCallback::CompleteMulticastUpdate)
        {
            // The GPT backup already fired
            Ok(()) | Err(GptError::NotScheduled) => {}
            Err(e) => warn!("[LAN911X] multicast completion cancel: {}", e),
        }
        self.complete_multicast_update();
        self.lan.write(INT_STS, INT_RXSTOP);
        self.lan.disable_interrupts(INT_RXSTOP);
        true
    }
}
