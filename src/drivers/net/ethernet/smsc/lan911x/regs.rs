//! LAN911x register map
//!
//! Direct registers are byte offsets from the chip base. MAC registers are
//! indices behind the MAC_CSR_CMD/MAC_CSR_DATA pair, PHY registers are MII
//! indices behind the MAC's MII_ACC/MII_DATA pair.
//!
//! Source: SMSC LAN9118 datasheet, section 5 (System Control and Status
//! Registers) and section 5.4 (MAC Control and Status Registers).

// ============================================================================
// FIFO Ports
// ============================================================================

pub const RX_DATA_FIFO: usize = 0x00;
pub const TX_DATA_FIFO: usize = 0x20;
pub const RX_STATUS_FIFO: usize = 0x40;
pub const RX_STATUS_FIFO_PEEK: usize = 0x44;
pub const TX_STATUS_FIFO: usize = 0x48;
pub const TX_STATUS_FIFO_PEEK: usize = 0x4C;

// TX command A
pub const TX_CMD_A_INT_ON_COMP: u32 = 0x8000_0000;
pub const TX_CMD_A_BUF_END_ALGN_16: u32 = 0x0100_0000;
pub const TX_CMD_A_BUF_END_ALGN_32: u32 = 0x0200_0000;
pub const TX_CMD_A_DATA_OFFSET_SHIFT: u32 = 16;
pub const TX_CMD_A_FIRST_SEG: u32 = 0x0000_2000;
pub const TX_CMD_A_LAST_SEG: u32 = 0x0000_1000;
pub const TX_CMD_A_BUF_SIZE: u32 = 0x0000_07FF;

// TX command B
pub const TX_CMD_B_PKT_TAG_SHIFT: u32 = 16;
pub const TX_CMD_B_PKT_BYTE_LENGTH: u32 = 0x0000_07FF;

// RX status word
pub const RX_STS_LENGTH_SHIFT: u32 = 16;
pub const RX_STS_LENGTH_MASK: u32 = 0x3FFF;
pub const RX_STS_ES: u32 = 0x0000_8000;
pub const RX_STS_LENGTH_ERROR: u32 = 0x0000_1000;
pub const RX_STS_MCAST: u32 = 0x0000_0400;
pub const RX_STS_FRAME_TYPE: u32 = 0x0000_0020;
pub const RX_STS_CRC_ERROR: u32 = 0x0000_0002;

// TX status word
pub const TX_STS_PACKET_TAG_SHIFT: u32 = 16;
pub const TX_STS_ES: u32 = 0x0000_8000;
pub const TX_STS_LOSS_OF_CARRIER: u32 = 0x0000_0800;
pub const TX_STS_NO_CARRIER: u32 = 0x0000_0400;
pub const TX_STS_LATE_COLLISION: u32 = 0x0000_0200;
pub const TX_STS_EXCESSIVE_COLLISIONS: u32 = 0x0000_0100;
pub const TX_STS_COLLISION_COUNT_SHIFT: u32 = 3;
pub const TX_STS_COLLISION_COUNT: u32 = 0x0000_000F;
pub const TX_STS_EXCESSIVE_DEFERRAL: u32 = 0x0000_0004;
pub const TX_STS_UNDERRUN: u32 = 0x0000_0002;
pub const TX_STS_DEFERRED: u32 = 0x0000_0001;
/// Reserved bit the chip never sets on a genuine status word
pub const TX_STS_BOGUS: u32 = 0x8000_0000;
/// Underrun, excessive deferral, no carrier: a failed frame even without ES
pub const TX_STS_HARD_FAILURE: u32 = 0x0000_7080;

// ============================================================================
// System Control and Status Registers
// ============================================================================

pub const ID_REV: usize = 0x50;

pub const INT_CFG: usize = 0x54;
pub const INT_CFG_INT_DEAS_SHIFT: u32 = 24;
pub const INT_CFG_INT_DEAS: u32 = 0xFF00_0000;
pub const INT_CFG_IRQ_INT: u32 = 0x0000_1000;
pub const INT_CFG_IRQ_EN: u32 = 0x0000_0100;
pub const INT_CFG_IRQ_POL: u32 = 0x0000_0010;
pub const INT_CFG_IRQ_TYPE: u32 = 0x0000_0001;
/// Both must be set for the line to be ours
pub const INT_CFG_ASSERTED: u32 = INT_CFG_IRQ_INT | INT_CFG_IRQ_EN;
/// Reserved INT_CFG bits; any of them high usually means the chip is gone
pub const INT_CFG_RESERVED: u32 = 0x00FF_CEEE;
pub const INT_CFG_RESERVED_LEGACY: u32 = 0x00FF_EEEE;

/// INT_STS and INT_EN share bit positions
pub const INT_STS: usize = 0x58;
pub const INT_EN: usize = 0x5C;
pub const INT_SW: u32 = 0x8000_0000;
pub const INT_TXSTOP: u32 = 0x0200_0000;
pub const INT_RXSTOP: u32 = 0x0100_0000;
pub const INT_RXDFH: u32 = 0x0080_0000;
pub const INT_RXDF: u32 = 0x0040_0000;
pub const INT_TX_IOC: u32 = 0x0020_0000;
pub const INT_RXD: u32 = 0x0010_0000;
pub const INT_GPT: u32 = 0x0008_0000;
pub const INT_PHY: u32 = 0x0004_0000;
pub const INT_PME: u32 = 0x0002_0000;
pub const INT_TXSO: u32 = 0x0001_0000;
pub const INT_RWT: u32 = 0x0000_8000;
pub const INT_RXE: u32 = 0x0000_4000;
pub const INT_TXE: u32 = 0x0000_2000;
pub const INT_ERX: u32 = 0x0000_1000;
pub const INT_TDFU: u32 = 0x0000_0800;
pub const INT_TDFO: u32 = 0x0000_0400;
pub const INT_TDFA: u32 = 0x0000_0200;
pub const INT_TSFF: u32 = 0x0000_0100;
pub const INT_TSFL: u32 = 0x0000_0080;
pub const INT_RDFO: u32 = 0x0000_0040;
pub const INT_RDFL: u32 = 0x0000_0020;
pub const INT_RSFF: u32 = 0x0000_0010;
pub const INT_RSFL: u32 = 0x0000_0008;
pub const INT_ALL: u32 = 0xFFFF_FFFF;

pub const BYTE_TEST: usize = 0x64;
pub const BYTE_TEST_PATTERN: u32 = 0x8765_4321;

pub const FIFO_INT: usize = 0x68;
pub const FIFO_INT_TX_AVAIL_LEVEL_SHIFT: u32 = 24;
pub const FIFO_INT_TX_AVAIL_LEVEL: u32 = 0xFF00_0000;
pub const FIFO_INT_TX_STS_LEVEL: u32 = 0x00FF_0000;
pub const FIFO_INT_RX_AVAIL_LEVEL_SHIFT: u32 = 8;
pub const FIFO_INT_RX_AVAIL_LEVEL: u32 = 0x0000_FF00;
pub const FIFO_INT_RX_STS_LEVEL: u32 = 0x0000_00FF;

pub const RX_CFG: usize = 0x6C;
pub const RX_CFG_RX_END_ALGN_16: u32 = 0x4000_0000;
pub const RX_CFG_RX_END_ALGN_32: u32 = 0x8000_0000;
pub const RX_CFG_RX_END_ALGN: u32 = 0xC000_0000;
pub const RX_CFG_RX_DMA_CNT: u32 = 0x0FFF_0000;
pub const RX_CFG_RX_DUMP: u32 = 0x0000_8000;
pub const RX_CFG_RXDOFF_SHIFT: u32 = 8;
pub const RX_CFG_RXDOFF: u32 = 0x0000_1F00;
/// Two bytes of offset so the IP header lands word aligned
pub const RX_CFG_PIO: u32 = 0x0000_0200;
pub const RX_CFG_DMA_16: u32 = RX_CFG_RX_END_ALGN_16 | (2 << RX_CFG_RXDOFF_SHIFT);
pub const RX_CFG_DMA_32: u32 = RX_CFG_RX_END_ALGN_32 | (18 << RX_CFG_RXDOFF_SHIFT);

pub const TX_CFG: usize = 0x70;
pub const TX_CFG_TXS_DUMP: u32 = 0x0000_8000;
pub const TX_CFG_TXD_DUMP: u32 = 0x0000_4000;
pub const TX_CFG_TXSAO: u32 = 0x0000_0004;
pub const TX_CFG_TX_ON: u32 = 0x0000_0002;
pub const TX_CFG_STOP_TX: u32 = 0x0000_0001;

pub const HW_CFG: usize = 0x74;
pub const HW_CFG_SF: u32 = 0x0010_0000;
pub const HW_CFG_TX_FIF_SZ_SHIFT: u32 = 16;
pub const HW_CFG_TX_FIF_SZ: u32 = 0x000F_0000;
pub const HW_CFG_PHY_CLK_SEL: u32 = 0x0000_0060;
pub const HW_CFG_PHY_CLK_SEL_INT_PHY: u32 = 0x0000_0000;
pub const HW_CFG_PHY_CLK_SEL_EXT_PHY: u32 = 0x0000_0020;
pub const HW_CFG_PHY_CLK_SEL_CLK_DIS: u32 = 0x0000_0040;
pub const HW_CFG_SMI_SEL: u32 = 0x0000_0010;
pub const HW_CFG_EXT_PHY_DET: u32 = 0x0000_0008;
pub const HW_CFG_EXT_PHY_EN: u32 = 0x0000_0004;
pub const HW_CFG_SRST_TO: u32 = 0x0000_0002;
pub const HW_CFG_SRST: u32 = 0x0000_0001;

pub const RX_DP_CTRL: usize = 0x78;
pub const RX_DP_CTRL_FFWD_BUSY: u32 = 0x8000_0000;

pub const RX_FIFO_INF: usize = 0x7C;
pub const RX_FIFO_INF_RXSUSED: u32 = 0x00FF_0000;
pub const RX_FIFO_INF_RXDUSED: u32 = 0x0000_FFFF;

pub const TX_FIFO_INF: usize = 0x80;
pub const TX_FIFO_INF_TSUSED_SHIFT: u32 = 16;
pub const TX_FIFO_INF_TSUSED: u32 = 0x00FF_0000;
pub const TX_FIFO_INF_TDFREE: u32 = 0x0000_FFFF;

pub const PMT_CTRL: usize = 0x84;
pub const PMT_CTRL_READY: u32 = 0x0000_0001;

pub const GPIO_CFG: usize = 0x88;
/// LED1..LED3 enabled, GPIO buffers push-pull
pub const GPIO_CFG_LEDS: u32 = 0x7007_0000;
/// EEDIO/EECLK function select; cleared hands the pins to the EEPROM controller
pub const GPIO_CFG_EEPROM_PINS: u32 = 0x00F0_0000;

pub const GPT_CFG: usize = 0x8C;
pub const GPT_CFG_TIMER_EN: u32 = 0x2000_0000;
pub const GPT_CFG_GPT_LOAD: u32 = 0x0000_FFFF;

pub const GPT_CNT: usize = 0x90;
pub const FPGA_REV: usize = 0x94;
pub const ENDIAN: usize = 0x98;
/// 25 MHz free-running counter
pub const FREE_RUN: usize = 0x9C;
/// Read-to-clear count of frames the chip dropped
pub const RX_DROP: usize = 0xA0;

pub const MAC_CSR_CMD: usize = 0xA4;
pub const MAC_CSR_CMD_CSR_BUSY: u32 = 0x8000_0000;
pub const MAC_CSR_CMD_R_NOT_W: u32 = 0x4000_0000;
pub const MAC_CSR_CMD_CSR_ADDR: u32 = 0x0000_00FF;

pub const MAC_CSR_DATA: usize = 0xA8;
pub const AFC_CFG: usize = 0xAC;
pub const AFC_CFG_FC_MASK: u32 = 0x0000_000F;
pub const AFC_CFG_FCANY: u32 = 0x0000_0001;
pub const AFC_CFG_FCADD: u32 = 0x0000_0002;
pub const AFC_CFG_FCBRD: u32 = 0x0000_0004;
pub const AFC_CFG_FCMULT: u32 = 0x0000_0008;

pub const E2P_CMD: usize = 0xB0;
pub const E2P_CMD_EPC_BUSY: u32 = 0x8000_0000;
pub const E2P_CMD_EPC_CMD_SHIFT: u32 = 28;
pub const E2P_CMD_EPC_CMD_READ: u32 = 0x0000_0000;
pub const E2P_CMD_EPC_CMD_EWDS: u32 = 1 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD_EWEN: u32 = 2 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD_WRITE: u32 = 3 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD_WRAL: u32 = 4 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD_ERASE: u32 = 5 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD_ERAL: u32 = 6 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD_RELOAD: u32 = 7 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_CMD: u32 = 7 << E2P_CMD_EPC_CMD_SHIFT;
pub const E2P_CMD_EPC_TIMEOUT: u32 = 0x0000_0200;
pub const E2P_CMD_MAC_ADDR_LOADED: u32 = 0x0000_0100;
pub const E2P_CMD_EPC_ADDR: u32 = 0x0000_00FF;

pub const E2P_DATA: usize = 0xB4;
pub const E2P_DATA_EEPROM_DATA: u32 = 0x0000_00FF;

/// Last direct register captured by a register dump
pub const LAST_DIRECT_REGISTER: usize = E2P_DATA;

// ============================================================================
// MAC Control and Status Registers (indirect, through MAC_CSR_CMD)
// ============================================================================

pub const MAC_CR: u32 = 0x01;
pub const MAC_CR_RXALL: u32 = 0x8000_0000;
pub const MAC_CR_HBDIS: u32 = 0x1000_0000;
pub const MAC_CR_RCVOWN: u32 = 0x0080_0000;
pub const MAC_CR_LOOPBK: u32 = 0x0020_0000;
pub const MAC_CR_FDPX: u32 = 0x0010_0000;
pub const MAC_CR_MCPAS: u32 = 0x0008_0000;
pub const MAC_CR_PRMS: u32 = 0x0004_0000;
pub const MAC_CR_INVFILT: u32 = 0x0002_0000;
pub const MAC_CR_PASSBAD: u32 = 0x0001_0000;
pub const MAC_CR_HFILT: u32 = 0x0000_8000;
pub const MAC_CR_HPFILT: u32 = 0x0000_2000;
pub const MAC_CR_BCAST: u32 = 0x0000_0800;
pub const MAC_CR_TXEN: u32 = 0x0000_0008;
pub const MAC_CR_RXEN: u32 = 0x0000_0004;

pub const ADDRH: u32 = 0x02;
pub const ADDRL: u32 = 0x03;
pub const HASHH: u32 = 0x04;
pub const HASHL: u32 = 0x05;

pub const MII_ACC: u32 = 0x06;
pub const MII_ACC_PHY_ADDR_SHIFT: u32 = 11;
pub const MII_ACC_MIIRINDA_SHIFT: u32 = 6;
pub const MII_ACC_MII_WRITE: u32 = 0x0000_0002;
pub const MII_ACC_MII_BUSY: u32 = 0x0000_0001;

pub const MII_DATA: u32 = 0x07;

pub const FLOW: u32 = 0x08;
/// Pause time 0xFFFF, flow control enabled
pub const FLOW_PAUSE_ENABLED: u32 = 0xFFFF_0002;
pub const FLOW_FCEN: u32 = 0x0000_0002;

pub const VLAN1: u32 = 0x09;
pub const VLAN2: u32 = 0x0A;
pub const WUFF: u32 = 0x0B;
pub const WUCSR: u32 = 0x0C;

/// Last MAC register captured by a register dump
pub const LAST_MAC_REGISTER: u32 = WUCSR;

// ============================================================================
// PHY Registers (IEEE 802.3 clause 22 plus LAN911x vendor block)
// ============================================================================

pub const PHY_BCR: u32 = 0;
pub const PHY_BCR_RESET: u16 = 0x8000;
pub const PHY_BCR_LOOPBACK: u16 = 0x4000;
pub const PHY_BCR_SPEED_SELECT: u16 = 0x2000;
pub const PHY_BCR_AUTO_NEG_ENABLE: u16 = 0x1000;
pub const PHY_BCR_RESTART_AUTO_NEG: u16 = 0x0200;
pub const PHY_BCR_DUPLEX_MODE: u16 = 0x0100;

pub const PHY_BSR: u32 = 1;
pub const PHY_BSR_LINK_STATUS: u16 = 0x0004;
pub const PHY_BSR_REMOTE_FAULT: u16 = 0x0010;
pub const PHY_BSR_AUTO_NEG_COMP: u16 = 0x0020;

pub const PHY_ID_1: u32 = 2;
pub const PHY_ID_2: u32 = 3;

pub const PHY_ANEG_ADV: u32 = 4;
pub const PHY_ANEG_ADV_PAUSE: u16 = 0x0C00;
pub const PHY_ANEG_ADV_ASYMP: u16 = 0x0800;
pub const PHY_ANEG_ADV_SYMP: u16 = 0x0400;
pub const PHY_ANEG_ADV_10H: u16 = 0x0020;
pub const PHY_ANEG_ADV_10F: u16 = 0x0040;
pub const PHY_ANEG_ADV_100H: u16 = 0x0080;
pub const PHY_ANEG_ADV_100F: u16 = 0x0100;
pub const PHY_ANEG_ADV_SPEED: u16 = 0x01E0;

pub const PHY_ANEG_LPA: u32 = 5;
pub const PHY_ANEG_LPA_ASYMP: u16 = 0x0800;
pub const PHY_ANEG_LPA_SYMP: u16 = 0x0400;
pub const PHY_ANEG_LPA_100FDX: u16 = 0x0100;
pub const PHY_ANEG_LPA_100HDX: u16 = 0x0080;
pub const PHY_ANEG_LPA_10FDX: u16 = 0x0040;
pub const PHY_ANEG_LPA_10HDX: u16 = 0x0020;

pub const PHY_ANEG_EXP: u32 = 6;
pub const PHY_MODE_CTRL_STS: u32 = 17;
pub const PHY_INT_SRC: u32 = 29;
pub const PHY_INT_MASK: u32 = 30;
pub const PHY_SPECIAL: u32 = 31;

/// Internal PHY ID (PHY_ID_1 << 16 | PHY_ID_2, revision masked off)
pub const LAN9118_PHY_ID: u32 = 0x00C0_001C;
pub const INTERNAL_PHY_ADDRESS: u8 = 1;
