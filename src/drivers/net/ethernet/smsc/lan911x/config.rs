//! Controller configuration
//!
//! Everything that used to be a load-time knob lives in one immutable
//! `ControllerConfig`, built with `ControllerConfig::new()` and consuming
//! `with_*` setters, validated once when the controller is created.

use super::phy::LinkModes;
use crate::drivers::net::NetworkError;
use crate::net::ethernet::MacAddress;
use log::warn;

/// Smallest and largest legal HW_CFG.TX_FIF_SZ (in KiB)
pub const TX_FIFO_SIZE_MIN: u8 = 2;
pub const TX_FIFO_SIZE_MAX: u8 = 14;

/// Which PHY the controller should drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhySelect {
    /// The built-in PHY at MII address 1
    Internal,
    /// An external PHY at a fixed MII address (0..=31)
    External(u8),
    /// Scan all MII addresses for an external PHY
    AutoDetect,
}

/// How a data path moves frames between the FIFOs and memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferChannel {
    /// Programmed I/O only
    Pio,
    /// Ask the platform for any free DMA channel
    Request,
    /// Use this platform DMA channel
    Channel(u32),
}

/// IRQ pin configuration written to INT_CFG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqConfig {
    /// Active-high instead of active-low
    pub polarity_high: bool,
    /// Push-pull instead of open-drain
    pub push_pull: bool,
    /// Deassertion interval in 10 µs units; `None` uses the flow-control default
    pub deassertion: Option<u8>,
}

impl IrqConfig {
    /// INT_CFG polarity and buffer-type bits
    pub fn int_cfg_bits(&self) -> u32 {
        use super::regs::{INT_CFG_IRQ_POL, INT_CFG_IRQ_TYPE};

        let mut bits = 0;
        if self.polarity_high {
            bits |= INT_CFG_IRQ_POL;
        }
        if self.push_pull {
            bits |= INT_CFG_IRQ_TYPE;
        }
        bits
    }
}

/// Per-field overrides of the flow-control defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowOverrides {
    pub max_throughput: Option<u32>,
    pub max_packet_count: Option<u32>,
    pub packet_cost: Option<u32>,
    pub burst_period: Option<u32>,
    pub max_work_load: Option<u32>,
    pub int_deas: Option<u8>,
}

/// Diagnostic output switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags(u32);

impl DebugFlags {
    /// Per-frame and per-interrupt trace points
    pub const TRACE: Self = Self(0x01);
    /// Data-path warnings
    pub const WARNING: Self = Self(0x02);
    /// Toggle GPIOs around hot paths (needs the LEDs off)
    pub const GPIO: Self = Self(0x04);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Immutable controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub link_mode: LinkModes,
    pub phy: PhySelect,
    pub irq: IrqConfig,
    pub tx_fifo_size: u8,
    pub afc_config: Option<u32>,
    pub rx_transfer: TransferChannel,
    pub tx_transfer: TransferChannel,
    /// Smallest frame that goes by Tx DMA
    pub dma_threshold: u32,
    pub mac_address: Option<MacAddress>,
    /// Drain Rx in a deferred worker instead of the interrupt handler
    pub deferred_rx: bool,
    pub flow: FlowOverrides,
    pub debug: DebugFlags,
    pub cache_line_size: usize,
}

#[allow(clippy::new_without_default)] // new() is the documented entry point for the setters
impl ControllerConfig {
    pub const fn new() -> Self {
        Self {
            link_mode: LinkModes::ALL,
            phy: PhySelect::Internal,
            irq: IrqConfig {
                polarity_high: false,
                push_pull: false,
                deassertion: None,
            },
            tx_fifo_size: 5,
            afc_config: None,
            rx_transfer: TransferChannel::Pio,
            tx_transfer: TransferChannel::Pio,
            dma_threshold: 200,
            mac_address: None,
            deferred_rx: false,
            flow: FlowOverrides {
                max_throughput: None,
                max_packet_count: None,
                packet_cost: None,
                burst_period: None,
                max_work_load: None,
                int_deas: None,
            },
            debug: DebugFlags::empty(),
            cache_line_size: 32,
        }
    }

    pub fn with_link_mode(mut self, link_mode: LinkModes) -> Self {
        self.link_mode = link_mode;
        self
    }

    pub fn with_phy(mut self, phy: PhySelect) -> Self {
        self.phy = phy;
        self
    }

    pub fn with_irq(mut self, irq: IrqConfig) -> Self {
        self.irq = irq;
        self
    }

    pub fn with_tx_fifo_size(mut self, kib: u8) -> Self {
        self.tx_fifo_size = kib;
        self
    }

    pub fn with_afc_config(mut self, afc: u32) -> Self {
        self.afc_config = Some(afc);
        self
    }

    pub fn with_rx_transfer(mut self, transfer: TransferChannel) -> Self {
        self.rx_transfer = transfer;
        self
    }

    pub fn with_tx_transfer(mut self, transfer: TransferChannel) -> Self {
        self.tx_transfer = transfer;
        self
    }

    pub fn with_dma_threshold(mut self, bytes: u32) -> Self {
        self.dma_threshold = bytes;
        self
    }

    pub fn with_mac_address(mut self, mac: MacAddress) -> Self {
        self.mac_address = Some(mac);
        self
    }

    pub fn with_deferred_rx(mut self, deferred: bool) -> Self {
        self.deferred_rx = deferred;
        self
    }

    pub fn with_flow(mut self, flow: FlowOverrides) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_cache_line_size(mut self, bytes: usize) -> Self {
        self.cache_line_size = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        if !(TX_FIFO_SIZE_MIN..=TX_FIFO_SIZE_MAX).contains(&self.tx_fifo_size) {
            warn!("[LAN911X] tx_fifo_size {} out of range", self.tx_fifo_size);
            return Err(NetworkError::InvalidConfiguration);
        }
        if self.afc_config.is_some_and(|afc| afc & 0xFF00_0000 != 0) {
            warn!("[LAN911X] afc_config has reserved bits set");
            return Err(NetworkError::InvalidConfiguration);
        }
        if !matches!(self.cache_line_size, 16 | 32) {
            warn!("[LAN911X] cache line size {} unsupported", self.cache_line_size);
            return Err(NetworkError::InvalidConfiguration);
        }
        if let PhySelect::External(address) = self.phy {
            if address > 31 {
                return Err(NetworkError::InvalidConfiguration);
            }
        }
        if self.link_mode.bits() & !LinkModes::ALL.bits() != 0 {
            return Err(NetworkError::InvalidConfiguration);
        }
        if self.mac_address.is_some_and(|mac| !mac.is_valid_station()) {
            warn!("[LAN911X] configured MAC address is not a unicast station address");
            return Err(NetworkError::InvalidConfiguration);
        }
        Ok(())
    }

    /// HW_CFG value selecting the Tx FIFO size
    pub fn hw_cfg_tx_fifo(&self) -> u32 {
        (self.tx_fifo_size as u32) << super::regs::HW_CFG_TX_FIF_SZ_SHIFT
    }

    /// Bytes left for the Rx data FIFO once the Tx FIFO is carved out
    pub fn rx_data_fifo_size(&self) -> u32 {
        match self.tx_fifo_size {
            2 => 13440,
            3 => 12480,
            4 => 11520,
            5 => 10560,
            6 => 9600,
            7 => 8640,
            8 => 7680,
            9 => 6720,
            10 => 5760,
            11 => 4800,
            12 => 3840,
            13 => 2880,
            _ => 1920,
        }
    }

    /// AFC_CFG value: the override, else the table entry for the FIFO split
    ///
    /// AFC_HI sits near two thirds of the Rx data FIFO, AFC_LO at half of
    /// that, BACK_DUR about 5 µs per AFC_LO unit.
    pub fn afc_cfg(&self) -> u32 {
        if let Some(afc) = self.afc_config {
            return afc;
        }
        match self.tx_fifo_size {
            2 => 0x008C_46AF,
            3 => 0x0082_419F,
            4 => 0x0078_3C9F,
            5 => 0x006E_374F,
            6 => 0x0064_328F,
            7 => 0x005A_2D7F,
            8 => 0x0050_287F,
            9 => 0x0046_236F,
            10 => 0x003C_1E6F,
            11 => 0x0032_195F,
            12 => 0x0024_124F,
            13 => 0x0015_073F,
            _ => 0x0006_032F,
        }
    }

    /// Pause-frame trigger bits applied when the link allows pause
    pub fn afc_pause_bits(&self) -> u32 {
        self.afc_config.map_or(super::regs::AFC_CFG_FC_MASK, |afc| {
            afc & super::regs::AFC_CFG_FC_MASK
        })
    }
}
