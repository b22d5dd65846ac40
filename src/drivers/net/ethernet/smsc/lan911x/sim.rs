//! Register-level LAN911x model for the unit tests
//!
//! `SimChip` behaves like the chip as far as the driver can tell: the
//! MAC_CSR and MII indirection, the FIFO formats, W1C interrupt status, the
//! GPT and FREE_RUN clocks, the EEPROM controller and soft reset. Time only
//! moves when the code under test calls `delay_us`.
//!
//! `SimPlatform` records everything the controller asks of its platform
//! and delivers the interrupt from inside `delay_us`, but only when no
//! IRQ-saving lock is held and no handler is already running.

use super::Controller;
use super::bus::RegisterBus;
use super::config::ControllerConfig;
use super::platform::{DmaDirection, DmaError, DmaSegment, Platform, RxVerdict};
use super::regs::*;
use crate::net::skbuff::SkBuff;
use crate::sync::mutex::interrupts_masked;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

const MAC_REGISTERS: usize = 16;
const EEPROM_SIZE: usize = 128;
const DMA_CHANNELS: u32 = 8;

const HW_CFG_DEFAULT: u32 = 0x0005_0000;
const FIFO_INT_DEFAULT: u32 = 0x4800_0000;
const INT_CFG_WRITABLE: u32 =
    INT_CFG_INT_DEAS | INT_CFG_IRQ_EN | INT_CFG_IRQ_POL | INT_CFG_IRQ_TYPE;

const BSR_ABILITIES: u16 = 0x7809;
const PHY_BCR_DEFAULT: u16 = PHY_BCR_SPEED_SELECT | PHY_BCR_AUTO_NEG_ENABLE;
const PHY_ADV_DEFAULT: u16 = 0x01E1;

// ============================================================================
// PHY
// ============================================================================

struct SimPhy {
    regs: [u16; 32],
}

impl SimPhy {
    fn new(id1: u16, id2: u16) -> Self {
        let mut phy = Self { regs: [0; 32] };
        phy.reset(id1, id2);
        phy
    }

    fn reset(&mut self, id1: u16, id2: u16) {
        self.regs = [0; 32];
        self.regs[PHY_BCR as usize] = PHY_BCR_DEFAULT;
        self.regs[PHY_ID_1 as usize] = id1;
        self.regs[PHY_ID_2 as usize] = id2;
        self.regs[PHY_ANEG_ADV as usize] = PHY_ADV_DEFAULT;
    }

    fn write(&mut self, index: usize, value: u16) {
        if index == PHY_BCR as usize && value & PHY_BCR_RESET != 0 {
            let (id1, id2) = (self.regs[PHY_ID_1 as usize], self.regs[PHY_ID_2 as usize]);
            self.reset(id1, id2);
            return;
        }
        self.regs[index] = if index == PHY_BCR as usize {
            value & !PHY_BCR_RESTART_AUTO_NEG
        } else {
            value
        };
    }
}

// ============================================================================
// Tx data FIFO parser
// ============================================================================

enum TxParse {
    CommandA,
    CommandB { a: u32 },
    Data { a: u32, b: u32, words: usize, bytes: Vec<u8> },
}

fn tx_data_words(a: u32) -> usize {
    let align = match a & (TX_CMD_A_BUF_END_ALGN_16 | TX_CMD_A_BUF_END_ALGN_32) {
        TX_CMD_A_BUF_END_ALGN_16 => 16,
        TX_CMD_A_BUF_END_ALGN_32 => 32,
        _ => 4,
    };
    let offset = ((a >> TX_CMD_A_DATA_OFFSET_SHIFT) & 0x1F) as usize;
    let size = (a & TX_CMD_A_BUF_SIZE) as usize;
    ((offset + size + align - 1) & !(align - 1)) / 4
}

// ============================================================================
// Chip
// ============================================================================

pub(crate) struct SimChip {
    id_rev: u32,
    time_us: u64,
    direct: [u32; 64],

    int_sts: u32,
    int_en: u32,
    int_cfg: u32,
    gpt_cfg: u32,
    gpt_expires_at: Option<u64>,
    rxstop_at: Option<u64>,

    mac_csr_cmd: u32,
    e2p_cmd: u32,
    eeprom: [u8; EEPROM_SIZE],
    eeprom_writes_enabled: bool,

    internal_phy: SimPhy,
    external_phys: Vec<(u8, SimPhy)>,
    link_up: bool,
    partner_ability: u16,

    rx_status: VecDeque<(u32, Vec<u8>)>,
    rx_data: VecDeque<VecDeque<u32>>,

    tx_parse: TxParse,
    tx_status: VecDeque<u32>,

    pub mac: [u32; MAC_REGISTERS],
    pub mac_stuck: bool,
    pub mii_stuck: bool,
    pub mii_writes_stuck: bool,
    pub remote_fault: bool,
    pub ext_phy_detect: bool,
    /// Time from RXEN clearing to INT_STS.RXSTOP; `None` never stops
    pub rx_stop_delay_us: Option<u64>,
    pub rx_drop: u32,
    pub fast_forwards: u32,
    pub dumps: u32,
    pub resets: u32,
    pub tx_frames: Vec<Vec<u8>>,
    pub tx_free_override: Option<u32>,
    pub fpga_rev: u32,
    /// EPC_CMD field of every EEPROM command issued
    pub eeprom_log: Vec<u32>,
    pub eeprom_stuck: bool,
    pub eeprom_present: bool,
    pub byte_test: u32,
    /// Extra bits ORed into every INT_CFG read
    pub int_cfg_noise: u32,
}

impl SimChip {
    fn new(id_rev: u32) -> Self {
        let mut chip = Self {
            id_rev,
            time_us: 0,
            direct: [0; 64],
            int_sts: 0,
            int_en: 0,
            int_cfg: 0,
            gpt_cfg: 0,
            gpt_expires_at: None,
            rxstop_at: None,
            mac_csr_cmd: 0,
            e2p_cmd: 0,
            eeprom: [0xFF; EEPROM_SIZE],
            eeprom_writes_enabled: false,
            internal_phy: SimPhy::new(0x0007, 0xC0C3),
            external_phys: Vec::new(),
            link_up: false,
            partner_ability: 0,
            rx_status: VecDeque::new(),
            rx_data: VecDeque::new(),
            tx_parse: TxParse::CommandA,
            tx_status: VecDeque::new(),
            mac: [0; MAC_REGISTERS],
            mac_stuck: false,
            mii_stuck: false,
            mii_writes_stuck: false,
            remote_fault: false,
            ext_phy_detect: false,
            rx_stop_delay_us: Some(2),
            rx_drop: 0,
            fast_forwards: 0,
            dumps: 0,
            resets: 0,
            tx_frames: Vec::new(),
            tx_free_override: None,
            fpga_rev: 0,
            eeprom_log: Vec::new(),
            eeprom_stuck: false,
            eeprom_present: true,
            byte_test: BYTE_TEST_PATTERN,
            int_cfg_noise: 0,
        };
        chip.soft_reset();
        chip.resets = 0;
        chip
    }

    fn soft_reset(&mut self) {
        self.resets += 1;
        self.direct = [0; 64];
        self.direct[HW_CFG / 4] = HW_CFG_DEFAULT;
        self.direct[FIFO_INT / 4] = FIFO_INT_DEFAULT;

        self.int_sts = 0;
        self.int_en = 0;
        self.int_cfg = 0;
        self.gpt_cfg = 0;
        self.gpt_expires_at = None;
        self.rxstop_at = None;

        self.mac = [0; MAC_REGISTERS];
        self.mac[ADDRH as usize] = 0x0000_FFFF;
        self.mac[ADDRL as usize] = 0xFFFF_FFFF;
        self.mac_csr_cmd = 0;

        self.rx_status.clear();
        self.rx_data.clear();
        self.tx_parse = TxParse::CommandA;
        self.tx_status.clear();

        self.e2p_cmd = 0;
        if self.eeprom_present {
            self.load_mac_from_eeprom();
        }
    }

    fn revision(&self) -> u32 {
        self.id_rev & 0xFFFF
    }

    fn legacy_registers(&self) -> bool {
        self.id_rev == 0x0118_0000 && (0x01..=0x25).contains(&(self.fpga_rev & 0xFF))
    }

    // ------------------------------------------------------------------------
    // Test knobs
    // ------------------------------------------------------------------------

    /// Register as the driver would read it, without read side effects
    pub fn reg(&self, offset: usize) -> u32 {
        match offset {
            ID_REV => self.id_rev,
            INT_CFG => {
                let pending = if self.int_status() & self.int_en != 0 {
                    INT_CFG_IRQ_INT
                } else {
                    0
                };
                self.int_cfg | pending | self.int_cfg_noise
            }
            INT_STS => self.int_status(),
            INT_EN => self.int_en,
            BYTE_TEST => self.byte_test,
            HW_CFG => {
                let detect = if self.ext_phy_detect { HW_CFG_EXT_PHY_DET } else { 0 };
                self.direct[HW_CFG / 4] | detect
            }
            RX_FIFO_INF => {
                let queued = self.rx_data.iter().map(|words| words.len() * 4).sum::<usize>()
                    + self.rx_status.iter().map(|(_, bytes)| bytes.len()).sum::<usize>();
                ((self.rx_status.len() as u32) << 16) | (queued as u32 & RX_FIFO_INF_RXDUSED)
            }
            TX_FIFO_INF => {
                let count = self.tx_status.len() as u32;
                let used = if self.legacy_registers() { 0x80 - count } else { count };
                let kib = (self.direct[HW_CFG / 4] & HW_CFG_TX_FIF_SZ) >> HW_CFG_TX_FIF_SZ_SHIFT;
                let free = self.tx_free_override.unwrap_or(kib * 1024);
                (used << TX_FIFO_INF_TSUSED_SHIFT) | (free & TX_FIFO_INF_TDFREE)
            }
            PMT_CTRL => PMT_CTRL_READY,
            GPT_CFG => self.gpt_cfg,
            GPT_CNT => self
                .gpt_expires_at
                .map_or(0, |at| (at.saturating_sub(self.time_us) / 100) as u32),
            FPGA_REV => self.fpga_rev,
            FREE_RUN => (self.time_us.wrapping_mul(25)) as u32,
            RX_DROP => self.rx_drop,
            MAC_CSR_CMD => self.mac_csr_cmd,
            E2P_CMD => self.e2p_cmd,
            RX_STATUS_FIFO_PEEK => self.rx_status.front().map_or(0, |(status, _)| *status),
            TX_STATUS_FIFO_PEEK => self.tx_status.front().copied().unwrap_or(0),
            _ => self.direct.get(offset / 4).copied().unwrap_or(0),
        }
    }

    /// Set INT_STS bits as if the events happened
    pub fn raise(&mut self, bits: u32) {
        self.int_sts |= bits;
    }

    /// Queue a received frame; `bytes` is the frame including FCS
    pub fn inject_rx(&mut self, status: u32, bytes: &[u8]) {
        self.rx_status.push_back((status, bytes.to_vec()));
    }

    /// Status words plus frames with unread data
    pub fn rx_pending(&self) -> usize {
        self.rx_status.len() + self.rx_data.len()
    }

    pub fn set_link(&mut self, up: bool, partner_ability: u16) {
        self.link_up = up;
        self.partner_ability = partner_ability;
    }

    pub fn add_external_phy(&mut self, address: u8, id1: u16, id2: u16) {
        self.external_phys.push((address, SimPhy::new(id1, id2)));
        self.ext_phy_detect = true;
    }

    /// PHY registers as read through MII; address 1 is the internal PHY
    pub fn phy(&self, address: u8) -> [u16; 32] {
        let phy = if address == INTERNAL_PHY_ADDRESS {
            Some(&self.internal_phy)
        } else {
            self.external_phys
                .iter()
                .find(|(at, _)| *at == address)
                .map(|(_, phy)| phy)
        };
        match phy {
            Some(phy) => {
                let mut regs = phy.regs;
                regs[PHY_BSR as usize] = self.bsr();
                regs[PHY_ANEG_LPA as usize] = self.partner_ability;
                regs
            }
            None => [0xFFFF; 32],
        }
    }

    pub fn advance(&mut self, us: u64) {
        self.time_us += us;
        if self.gpt_expires_at.is_some_and(|at| at <= self.time_us) {
            self.gpt_expires_at = None;
            self.int_sts |= INT_GPT;
        }
        if self.rxstop_at.is_some_and(|at| at <= self.time_us) {
            self.rxstop_at = None;
            self.int_sts |= INT_RXSTOP;
        }
    }

    pub fn irq_asserted(&self) -> bool {
        self.int_cfg & INT_CFG_IRQ_EN != 0 && self.int_status() & self.int_en != 0
    }

    // ------------------------------------------------------------------------
    // Interrupts
    // ------------------------------------------------------------------------

    fn int_status(&self) -> u32 {
        if self.rx_status.is_empty() {
            self.int_sts
        } else {
            self.int_sts | INT_RSFL
        }
    }

    fn write_int_en(&mut self, value: u32) {
        if self.int_en & INT_SW == 0 && value & INT_SW != 0 {
            self.int_sts |= INT_SW;
        }
        self.int_en = value;
    }

    fn write_gpt_cfg(&mut self, value: u32) {
        self.gpt_cfg = value;
        self.gpt_expires_at = if value & GPT_CFG_TIMER_EN != 0 {
            Some(self.time_us + (value & GPT_CFG_GPT_LOAD) as u64 * 100)
        } else {
            None
        };
    }

    // ------------------------------------------------------------------------
    // MAC and MII
    // ------------------------------------------------------------------------

    fn write_mac_csr_cmd(&mut self, value: u32) {
        if value & MAC_CSR_CMD_CSR_BUSY == 0 || self.mac_stuck {
            self.mac_csr_cmd = value;
            return;
        }
        let index = (value & MAC_CSR_CMD_CSR_ADDR) as usize;
        if value & MAC_CSR_CMD_R_NOT_W != 0 {
            self.direct[MAC_CSR_DATA / 4] = self.mac.get(index).copied().unwrap_or(0);
        } else {
            let data = self.direct[MAC_CSR_DATA / 4];
            self.mac_write(index, data);
        }
        self.mac_csr_cmd = value & !MAC_CSR_CMD_CSR_BUSY;
    }

    fn mac_write(&mut self, index: usize, value: u32) {
        match index as u32 {
            MAC_CR => {
                let was_on = self.mac[MAC_CR as usize] & MAC_CR_RXEN != 0;
                self.mac[MAC_CR as usize] = value;
                if value & MAC_CR_RXEN != 0 {
                    self.rxstop_at = None;
                } else if was_on {
                    self.rxstop_at = self.rx_stop_delay_us.map(|delay| self.time_us + delay);
                }
            }
            MII_ACC => {
                let write = value & MII_ACC_MII_WRITE != 0;
                if value & MII_ACC_MII_BUSY == 0 || self.mii_stuck || (write && self.mii_writes_stuck) {
                    self.mac[MII_ACC as usize] = value;
                    return;
                }
                let address = ((value >> MII_ACC_PHY_ADDR_SHIFT) & 0x1F) as u8;
                let index = ((value >> MII_ACC_MIIRINDA_SHIFT) & 0x1F) as usize;
                if write {
                    let data = self.mac[MII_DATA as usize] as u16;
                    self.mii_write(address, index, data);
                } else {
                    self.mac[MII_DATA as usize] = self.mii_read(address, index) as u32;
                }
                self.mac[MII_ACC as usize] = value & !MII_ACC_MII_BUSY;
            }
            _ => {
                if let Some(register) = self.mac.get_mut(index) {
                    *register = value;
                }
            }
        }
    }

    fn bsr(&self) -> u16 {
        let mut bsr = BSR_ABILITIES;
        if self.link_up {
            bsr |= PHY_BSR_LINK_STATUS | PHY_BSR_AUTO_NEG_COMP;
        }
        if self.remote_fault {
            bsr |= PHY_BSR_REMOTE_FAULT;
        }
        bsr
    }

    /// PHY reachable at `address` through the current SMI routing
    fn routed_phy(&mut self, address: u8) -> Option<&mut SimPhy> {
        if self.direct[HW_CFG / 4] & HW_CFG_SMI_SEL != 0 {
            self.external_phys
                .iter_mut()
                .find(|(at, _)| *at == address)
                .map(|(_, phy)| phy)
        } else if address == INTERNAL_PHY_ADDRESS {
            Some(&mut self.internal_phy)
        } else {
            None
        }
    }

    fn mii_read(&mut self, address: u8, index: usize) -> u16 {
        let bsr = self.bsr();
        let partner = self.partner_ability;
        match self.routed_phy(address) {
            Some(_) if index == PHY_BSR as usize => bsr,
            Some(_) if index == PHY_ANEG_LPA as usize => partner,
            Some(phy) => phy.regs[index],
            None => 0xFFFF,
        }
    }

    fn mii_write(&mut self, address: u8, index: usize, value: u16) {
        if let Some(phy) = self.routed_phy(address) {
            phy.write(index, value);
        }
    }

    // ------------------------------------------------------------------------
    // EEPROM
    // ------------------------------------------------------------------------

    fn load_mac_from_eeprom(&mut self) {
        let e = &self.eeprom;
        if e[0] == 0xA5 {
            self.mac[ADDRL as usize] =
                u32::from_le_bytes([e[1], e[2], e[3], e[4]]);
            self.mac[ADDRH as usize] = u32::from(e[5]) | (u32::from(e[6]) << 8);
            self.e2p_cmd |= E2P_CMD_MAC_ADDR_LOADED;
        } else {
            self.e2p_cmd &= !E2P_CMD_MAC_ADDR_LOADED;
        }
    }

    fn write_e2p_cmd(&mut self, value: u32) {
        if value & E2P_CMD_EPC_BUSY == 0 {
            return;
        }
        let command = value & E2P_CMD_EPC_CMD;
        let address = (value & E2P_CMD_EPC_ADDR) as usize % EEPROM_SIZE;
        let loaded = self.e2p_cmd & E2P_CMD_MAC_ADDR_LOADED;
        self.eeprom_log.push(command);

        if self.eeprom_stuck {
            self.e2p_cmd = (value & (E2P_CMD_EPC_BUSY | E2P_CMD_EPC_CMD | E2P_CMD_EPC_ADDR)) | loaded;
            return;
        }
        self.e2p_cmd = (value & (E2P_CMD_EPC_CMD | E2P_CMD_EPC_ADDR)) | loaded;
        if !self.eeprom_present {
            self.e2p_cmd |= E2P_CMD_EPC_TIMEOUT;
            if command == E2P_CMD_EPC_CMD_RELOAD {
                self.e2p_cmd &= !E2P_CMD_MAC_ADDR_LOADED;
            }
            return;
        }

        let data = (self.direct[E2P_DATA / 4] & E2P_DATA_EEPROM_DATA) as u8;
        let writable = self.eeprom_writes_enabled;
        match command {
            E2P_CMD_EPC_CMD_READ => {
                self.direct[E2P_DATA / 4] = self.eeprom[address] as u32;
            }
            E2P_CMD_EPC_CMD_EWDS => self.eeprom_writes_enabled = false,
            E2P_CMD_EPC_CMD_EWEN => self.eeprom_writes_enabled = true,
            E2P_CMD_EPC_CMD_WRITE if writable => {
                self.eeprom[address] = data;
                if self.revision() == 0 {
                    self.eeprom_writes_enabled = false;
                }
            }
            E2P_CMD_EPC_CMD_WRAL if writable => self.eeprom = [data; EEPROM_SIZE],
            E2P_CMD_EPC_CMD_ERASE if writable => self.eeprom[address] = 0xFF,
            E2P_CMD_EPC_CMD_ERAL if writable => self.eeprom = [0xFF; EEPROM_SIZE],
            E2P_CMD_EPC_CMD_RELOAD => self.load_mac_from_eeprom(),
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Rx FIFOs
    // ------------------------------------------------------------------------

    /// Pop a status word and lay its frame out the way RX_CFG asks
    fn pop_rx_status(&mut self) -> u32 {
        let Some((status, bytes)) = self.rx_status.pop_front() else {
            return 0;
        };
        let rx_cfg = self.direct[RX_CFG / 4];
        let offset = ((rx_cfg & RX_CFG_RXDOFF) >> RX_CFG_RXDOFF_SHIFT) as usize;
        let align = match rx_cfg & RX_CFG_RX_END_ALGN {
            RX_CFG_RX_END_ALGN_16 => 16,
            RX_CFG_RX_END_ALGN_32 => 32,
            _ => 4,
        };
        let len = ((status >> RX_STS_LENGTH_SHIFT) & RX_STS_LENGTH_MASK) as usize;
        let total = (offset + len).div_ceil(align) * align;

        let mut image = vec![0u8; total];
        let copied = len.min(bytes.len());
        image[offset..offset + copied].copy_from_slice(&bytes[..copied]);
        let words: VecDeque<u32> = image
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if !words.is_empty() {
            self.rx_data.push_back(words);
        }
        status
    }

    fn pop_rx_data(&mut self) -> u32 {
        let Some(front) = self.rx_data.front_mut() else {
            return 0;
        };
        let word = front.pop_front().unwrap_or(0);
        if front.is_empty() {
            self.rx_data.pop_front();
        }
        word
    }

    fn write_rx_cfg(&mut self, value: u32) {
        if value & RX_CFG_RX_DUMP != 0 {
            self.rx_status.clear();
            self.rx_data.clear();
            self.dumps += 1;
        }
        self.direct[RX_CFG / 4] = value & !RX_CFG_RX_DUMP;
    }

    // ------------------------------------------------------------------------
    // Tx FIFOs
    // ------------------------------------------------------------------------

    fn push_tx_data(&mut self, word: u32) {
        self.tx_parse = match core::mem::replace(&mut self.tx_parse, TxParse::CommandA) {
            TxParse::CommandA => TxParse::CommandB { a: word },
            TxParse::CommandB { a } => TxParse::Data {
                a,
                b: word,
                words: tx_data_words(a),
                bytes: Vec::new(),
            },
            TxParse::Data { a, b, words, mut bytes } => {
                bytes.extend_from_slice(&word.to_le_bytes());
                if bytes.len() / 4 < words {
                    TxParse::Data { a, b, words, bytes }
                } else {
                    let offset = ((a >> TX_CMD_A_DATA_OFFSET_SHIFT) & 0x1F) as usize;
                    let size = (a & TX_CMD_A_BUF_SIZE) as usize;
                    self.tx_frames.push(bytes[offset..offset + size].to_vec());
                    let tag = b >> TX_CMD_B_PKT_TAG_SHIFT;
                    self.tx_status.push_back(tag << TX_STS_PACKET_TAG_SHIFT);
                    TxParse::CommandA
                }
            }
        };
    }

    fn write_tx_cfg(&mut self, value: u32) {
        if value & TX_CFG_TXS_DUMP != 0 {
            self.tx_status.clear();
        }
        if value & TX_CFG_TXD_DUMP != 0 {
            self.tx_parse = TxParse::CommandA;
        }
        self.direct[TX_CFG / 4] = value & !(TX_CFG_TXS_DUMP | TX_CFG_TXD_DUMP);
    }

    // ------------------------------------------------------------------------
    // Bus
    // ------------------------------------------------------------------------

    fn read(&mut self, offset: usize) -> u32 {
        match offset {
            RX_DATA_FIFO => self.pop_rx_data(),
            RX_STATUS_FIFO => self.pop_rx_status(),
            TX_STATUS_FIFO => self.tx_status.pop_front().unwrap_or(0),
            RX_DROP => core::mem::take(&mut self.rx_drop),
            _ => self.reg(offset),
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        match offset {
            TX_DATA_FIFO => self.push_tx_data(value),
            INT_CFG => self.int_cfg = value & INT_CFG_WRITABLE,
            INT_STS => self.int_sts &= !value,
            INT_EN => self.write_int_en(value),
            HW_CFG => {
                if value & HW_CFG_SRST != 0 {
                    self.soft_reset();
                } else {
                    self.direct[HW_CFG / 4] =
                        value & !(HW_CFG_SRST | HW_CFG_SRST_TO | HW_CFG_EXT_PHY_DET);
                }
            }
            RX_CFG => self.write_rx_cfg(value),
            TX_CFG => self.write_tx_cfg(value),
            RX_DP_CTRL => {
                if value & RX_DP_CTRL_FFWD_BUSY != 0 && self.rx_data.pop_front().is_some() {
                    self.fast_forwards += 1;
                }
            }
            GPT_CFG => self.write_gpt_cfg(value),
            MAC_CSR_CMD => self.write_mac_csr_cmd(value),
            E2P_CMD => self.write_e2p_cmd(value),
            ID_REV | BYTE_TEST | FPGA_REV | FREE_RUN | RX_DROP | RX_FIFO_INF | TX_FIFO_INF
            | GPT_CNT | PMT_CTRL => {}
            _ => {
                if let Some(register) = self.direct.get_mut(offset / 4) {
                    *register = value;
                }
            }
        }
    }
}

// ============================================================================
// Bus
// ============================================================================

#[derive(Clone)]
pub(crate) struct SimBus(Rc<RefCell<SimChip>>);

impl SimBus {
    pub fn new(id_rev: u32) -> Self {
        Self(Rc::new(RefCell::new(SimChip::new(id_rev))))
    }

    pub fn chip(&self) -> RefMut<'_, SimChip> {
        self.0.borrow_mut()
    }
}

impl RegisterBus for SimBus {
    fn read(&self, offset: usize) -> u32 {
        self.0.borrow_mut().read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.0.borrow_mut().write(offset, value)
    }
}

// ============================================================================
// Platform
// ============================================================================

type SimController = Controller<SimBus, SimPlatform>;

struct PlatformState {
    bus: SimBus,
    controller: RefCell<Weak<SimController>>,

    attached: Cell<bool>,
    attach_fails: Cell<bool>,
    irq_wired: Cell<bool>,
    in_isr: Cell<bool>,
    congested: Cell<bool>,

    delivered: RefCell<Vec<Vec<u8>>>,
    masked_deliveries: Cell<u32>,
    stops: Cell<u32>,
    wakes: Cell<u32>,
    link_timer: Cell<Option<u32>>,
    deferred: Cell<u32>,

    reserved: RefCell<Vec<u32>>,
    tx_dma: RefCell<Vec<(u32, DmaSegment)>>,
    tx_dma_pending: Cell<Option<DmaSegment>>,
    rx_dma: RefCell<Vec<(u32, Vec<DmaSegment>)>>,
    rx_dma_pending: RefCell<Option<Vec<DmaSegment>>>,
    rx_dma_autocomplete: Cell<bool>,
    dma_aborts: RefCell<Vec<u32>>,
}

#[derive(Clone)]
pub(crate) struct SimPlatform(Rc<PlatformState>);

impl SimPlatform {
    pub fn new(bus: SimBus) -> Self {
        Self(Rc::new(PlatformState {
            bus,
            controller: RefCell::new(Weak::new()),
            attached: Cell::new(false),
            attach_fails: Cell::new(false),
            irq_wired: Cell::new(true),
            in_isr: Cell::new(false),
            congested: Cell::new(false),
            delivered: RefCell::new(Vec::new()),
            masked_deliveries: Cell::new(0),
            stops: Cell::new(0),
            wakes: Cell::new(0),
            link_timer: Cell::new(None),
            deferred: Cell::new(0),
            reserved: RefCell::new(Vec::new()),
            tx_dma: RefCell::new(Vec::new()),
            tx_dma_pending: Cell::new(None),
            rx_dma: RefCell::new(Vec::new()),
            rx_dma_pending: RefCell::new(None),
            rx_dma_autocomplete: Cell::new(false),
            dma_aborts: RefCell::new(Vec::new()),
        }))
    }

    /// Route interrupts to `controller`
    pub fn bind(&self, controller: &Rc<SimController>) {
        *self.0.controller.borrow_mut() = Rc::downgrade(controller);
    }

    fn run_isr(&self) -> bool {
        let controller = self.0.controller.borrow().upgrade();
        let Some(controller) = controller else {
            return false;
        };
        self.0.in_isr.set(true);
        let handled = controller.handle_interrupt();
        self.0.in_isr.set(false);
        handled
    }

    fn try_deliver(&self) {
        let state = &self.0;
        if interrupts_masked() || state.in_isr.get() {
            return;
        }
        if !state.attached.get() || !state.irq_wired.get() {
            return;
        }
        if state.bus.chip().irq_asserted() {
            self.run_isr();
        }
    }

    /// Run the interrupt handler once, asserted or not
    pub fn service_irq(&self) -> bool {
        self.run_isr()
    }

    pub fn fail_attach(&self, fail: bool) {
        self.0.attach_fails.set(fail);
    }

    /// Disconnect the chip's interrupt pin from the handler
    pub fn cut_irq_line(&self, cut: bool) {
        self.0.irq_wired.set(!cut);
    }

    pub fn set_congested(&self, congested: bool) {
        self.0.congested.set(congested);
    }

    pub fn attached(&self) -> bool {
        self.0.attached.get()
    }

    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.0.delivered.borrow().clone()
    }

    /// Frames handed up while an IRQ-saving lock was held
    pub fn masked_deliveries(&self) -> u32 {
        self.0.masked_deliveries.get()
    }

    pub fn stops(&self) -> u32 {
        self.0.stops.get()
    }

    pub fn wakes(&self) -> u32 {
        self.0.wakes.get()
    }

    pub fn link_timer(&self) -> Option<u32> {
        self.0.link_timer.get()
    }

    pub fn clear_link_timer(&self) {
        self.0.link_timer.set(None);
    }

    pub fn deferred_requests(&self) -> u32 {
        self.0.deferred.get()
    }

    pub fn reserved_channels(&self) -> Vec<u32> {
        let mut channels = self.0.reserved.borrow().clone();
        channels.sort_unstable();
        channels
    }

    pub fn tx_dma_starts(&self) -> Vec<(u32, DmaSegment)> {
        self.0.tx_dma.borrow().clone()
    }

    pub fn rx_dma_starts(&self) -> Vec<(u32, Vec<DmaSegment>)> {
        self.0.rx_dma.borrow().clone()
    }

    /// Finish the Tx DMA in flight: feed its words into the data FIFO
    pub fn complete_tx_dma(&self, controller: &SimController) {
        if let Some(segment) = self.0.tx_dma_pending.take() {
            for _ in 0..segment.len / 4 {
                self.0.bus.write(TX_DATA_FIFO, 0);
            }
        }
        controller.on_tx_dma_complete();
    }

    /// Finish the Rx DMA batch in flight: drain its words from the data FIFO
    pub fn complete_rx_dma(&self, controller: &SimController) {
        let segments = self.0.rx_dma_pending.borrow_mut().take();
        let words: usize = segments
            .iter()
            .flatten()
            .map(|segment| segment.len / 4)
            .sum();
        for _ in 0..words {
            self.0.bus.read(RX_DATA_FIFO);
        }
        controller.on_rx_dma_complete();
    }

    /// Let the Rx DMA engine finish its batch during the next delay
    pub fn complete_rx_dma_on_delay(&self, enabled: bool) {
        self.0.rx_dma_autocomplete.set(enabled);
    }

    pub fn dma_aborts(&self) -> Vec<u32> {
        self.0.dma_aborts.borrow().clone()
    }

    fn try_complete_rx_dma(&self) {
        if !self.0.rx_dma_autocomplete.get()
            || interrupts_masked()
            || self.0.rx_dma_pending.borrow().is_none()
        {
            return;
        }
        let controller = self.0.controller.borrow().upgrade();
        if let Some(controller) = controller {
            self.complete_rx_dma(&controller);
        }
    }

    fn channel_reserved(&self, channel: u32) -> bool {
        self.0.reserved.borrow().contains(&channel)
    }
}

impl Platform for SimPlatform {
    fn delay_us(&self, us: u32) {
        for _ in 0..us {
            self.0.bus.chip().advance(1);
            self.try_deliver();
            self.try_complete_rx_dma();
        }
    }

    fn deliver(&self, frame: SkBuff) -> RxVerdict {
        self.0.delivered.borrow_mut().push(frame.data().to_vec());
        if interrupts_masked() {
            self.0.masked_deliveries.set(self.0.masked_deliveries.get() + 1);
        }
        if self.0.congested.get() {
            RxVerdict::Congested
        } else {
            RxVerdict::Accepted
        }
    }

    fn stop_queue(&self) {
        self.0.stops.set(self.0.stops.get() + 1);
    }

    fn wake_queue(&self) {
        self.0.wakes.set(self.0.wakes.get() + 1);
    }

    fn request_dma_channel(&self, _direction: DmaDirection) -> Option<u32> {
        let channel = (0..DMA_CHANNELS).find(|&channel| !self.channel_reserved(channel))?;
        self.0.reserved.borrow_mut().push(channel);
        Some(channel)
    }

    fn reserve_dma_channel(&self, channel: u32, _direction: DmaDirection) -> bool {
        if channel >= DMA_CHANNELS || self.channel_reserved(channel) {
            return false;
        }
        self.0.reserved.borrow_mut().push(channel);
        true
    }

    fn release_dma_channel(&self, channel: u32) {
        self.0.reserved.borrow_mut().retain(|&held| held != channel);
    }

    fn cache_purge(&self, _addr: usize, _len: usize) {}

    fn start_tx_dma(&self, channel: u32, segment: DmaSegment) -> Result<(), DmaError> {
        if !self.channel_reserved(channel) {
            return Err(DmaError::InvalidChannel);
        }
        self.0.tx_dma.borrow_mut().push((channel, segment));
        self.0.tx_dma_pending.set(Some(segment));
        Ok(())
    }

    fn start_rx_dma(&self, channel: u32, segments: &[DmaSegment]) -> Result<(), DmaError> {
        if !self.channel_reserved(channel) {
            return Err(DmaError::InvalidChannel);
        }
        self.0.rx_dma.borrow_mut().push((channel, segments.to_vec()));
        *self.0.rx_dma_pending.borrow_mut() = Some(segments.to_vec());
        Ok(())
    }

    fn abort_dma(&self, channel: u32) {
        self.0.dma_aborts.borrow_mut().push(channel);
        if self.0.rx_dma.borrow().last().is_some_and(|(started, _)| *started == channel) {
            self.0.rx_dma_pending.borrow_mut().take();
        }
        if self.0.tx_dma.borrow().last().is_some_and(|(started, _)| *started == channel) {
            self.0.tx_dma_pending.take();
        }
    }

    fn schedule_deferred_rx(&self) {
        self.0.deferred.set(self.0.deferred.get() + 1);
    }

    fn attach_irq(&self) -> bool {
        if self.0.attach_fails.get() {
            return false;
        }
        self.0.attached.set(true);
        true
    }

    fn detach_irq(&self) {
        self.0.attached.set(false);
    }

    fn arm_link_timer(&self, period_ms: u32) {
        self.0.link_timer.set(Some(period_ms));
    }

    fn cancel_link_timer(&self) {
        self.0.link_timer.set(None);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub(crate) struct Harness {
    pub bus: SimBus,
    pub platform: SimPlatform,
    pub controller: Rc<SimController>,
}

impl Harness {
    fn build(bus: SimBus, platform: SimPlatform, config: ControllerConfig) -> Self {
        let controller = Rc::new(
            Controller::new(bus.clone(), platform.clone(), config).expect("chip identifies"),
        );
        platform.bind(&controller);
        Self {
            bus,
            platform,
            controller,
        }
    }

    pub fn open(&self) {
        self.controller.open().expect("open succeeds");
    }

    /// Identify the chip again, e.g. after changing FPGA_REV
    pub fn reidentify(self) -> Self {
        let config = self.controller.config().clone();
        Self::build(self.bus, self.platform, config)
    }
}

pub(crate) fn setup(config: ControllerConfig) -> Harness {
    setup_chip(0x0118_0002, config)
}

pub(crate) fn setup_chip(id_rev: u32, config: ControllerConfig) -> Harness {
    let bus = SimBus::new(id_rev);
    let platform = SimPlatform::new(bus.clone());
    Harness::build(bus, platform, config)
}
