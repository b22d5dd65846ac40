//! Chip identification
//!
//! ID_REV carries the part number in its high half and the silicon
//! revision in its low half. The driver cares about the part mostly through
//! its *generation*, which decides a handful of workarounds:
//!
//! | Generation | Parts                      | Differences                          |
//! |------------|----------------------------|--------------------------------------|
//! | 0          | LAN9118/9117 rev 0 (Beacon)| RDFL overrun, 3x soft reset, GPT-only multicast |
//! | 1          | LAN911x rev 1 (Concord A0) | RXSTOP poll then GPT for multicast   |
//! | 2          | LAN911x rev >= 2 (A1)      | immediate multicast update           |
//! | 3          | LAN921x (Boylston)         | as 2                                 |

use super::regs::{INT_CFG_RESERVED, INT_CFG_RESERVED_LEGACY, INT_RDFL, INT_RDFO};
use crate::drivers::net::NetworkError;
use core::fmt;

/// Status words pulled per scatter-gather batch on generation 1 and later
pub const MAX_RX_DMA_BATCH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipModel {
    Lan9118,
    Lan9117,
    Lan9116,
    Lan9115,
    Lan9112,
    Lan9218,
    Lan9217,
    Lan9216,
    Lan9215,
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipModel::Lan9118 => "LAN9118",
            ChipModel::Lan9117 => "LAN9117",
            ChipModel::Lan9116 => "LAN9116",
            ChipModel::Lan9115 => "LAN9115",
            ChipModel::Lan9112 => "LAN9112",
            ChipModel::Lan9218 => "LAN9218",
            ChipModel::Lan9217 => "LAN9217",
            ChipModel::Lan9216 => "LAN9216",
            ChipModel::Lan9215 => "LAN9215",
        };
        write!(f, "{}", name)
    }
}

/// What ID_REV (and FPGA_REV) say about the part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipId {
    id_rev: u32,
    model: ChipModel,
    generation: u8,
    fpga_rev: u8,
}

impl ChipId {
    pub fn from_id_rev(id_rev: u32) -> Result<Self, NetworkError> {
        let part = id_rev >> 16;
        let revision = id_rev & 0xFFFF;

        // A 32-bit chip read through a 16-bit bus shows the same half twice
        if part == revision {
            return Err(NetworkError::HardwareNotPresent);
        }

        let concord = |model: ChipModel| -> Result<(ChipModel, u8), NetworkError> {
            match revision {
                0 => Err(NetworkError::UnsupportedChip(id_rev)),
                1 => Ok((model, 1)),
                _ => Ok((model, 2)),
            }
        };

        let (model, generation) = match part {
            0x0118 => (ChipModel::Lan9118, revision.min(2) as u8),
            0x0117 => (ChipModel::Lan9117, revision.min(2) as u8),
            0x0116 => concord(ChipModel::Lan9116)?,
            0x0115 => concord(ChipModel::Lan9115)?,
            0x0112 => concord(ChipModel::Lan9112)?,
            0x118A => (ChipModel::Lan9218, 3),
            0x117A => (ChipModel::Lan9217, 3),
            0x116A => (ChipModel::Lan9216, 3),
            0x115A => (ChipModel::Lan9215, 3),
            _ => return Err(NetworkError::UnsupportedChip(id_rev)),
        };

        Ok(Self {
            id_rev,
            model,
            generation,
            fpga_rev: 0,
        })
    }

    /// Record the FPGA_REV register (only the low byte is meaningful)
    pub fn with_fpga_rev(mut self, fpga_rev: u32) -> Self {
        self.fpga_rev = (fpga_rev & 0xFF) as u8;
        self
    }

    pub fn id_rev(&self) -> u32 {
        self.id_rev
    }

    pub fn model(&self) -> ChipModel {
        self.model
    }

    pub fn generation(&self) -> u8 {
        self.generation
    }

    pub fn revision(&self) -> u16 {
        (self.id_rev & 0xFFFF) as u16
    }

    pub fn fpga_rev(&self) -> u8 {
        self.fpga_rev
    }

    /// Early LAN9118 FPGA builds with a different INT_CFG and TX_FIFO_INF layout
    pub fn legacy_registers(&self) -> bool {
        self.id_rev == 0x0118_0000 && (0x01..=0x25).contains(&self.fpga_rev)
    }

    /// INT_CFG bits that must read back as zero on a live chip
    pub fn int_cfg_reserved(&self) -> u32 {
        if self.legacy_registers() {
            INT_CFG_RESERVED_LEGACY
        } else {
            INT_CFG_RESERVED
        }
    }

    /// Interrupt status bit that reports an Rx data FIFO overrun
    pub fn overrun_interrupt(&self) -> u32 {
        if self.generation == 0 { INT_RDFL } else { INT_RDFO }
    }

    /// HW_CFG.SRST cycles needed for a clean reset
    pub fn soft_reset_count(&self) -> u32 {
        if self.generation == 0 { 3 } else { 1 }
    }

    /// Largest scatter-gather batch of Rx frames
    pub fn rx_dma_batch(&self) -> usize {
        if self.generation == 0 { 1 } else { MAX_RX_DMA_BATCH }
    }

    /// Whether RX_DP_CTRL can skip a frame, instead of reading it out word by word
    pub fn hardware_fast_forward(&self) -> bool {
        self.revision() != 0 || self.fpga_rev >= 0x36
    }

    /// Whether the part has the SMI/clock muxing for an external PHY
    pub fn supports_external_phy(&self) -> bool {
        match self.id_rev >> 16 {
            0x117A | 0x115A => true,
            0x0117 | 0x0115 => self.revision() != 0,
            _ => false,
        }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rev {} (ID_REV 0x{:08X}, generation {})",
            self.model,
            self.revision(),
            self.id_rev,
            self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lan9118_revisions() {
        let beacon = ChipId::from_id_rev(0x0118_0000).unwrap();
        assert_eq!(beacon.model(), ChipModel::Lan9118);
        assert_eq!(beacon.generation(), 0);
        assert_eq!(beacon.overrun_interrupt(), INT_RDFL);
        assert_eq!(beacon.soft_reset_count(), 3);
        assert_eq!(beacon.rx_dma_batch(), 1);

        assert_eq!(ChipId::from_id_rev(0x0118_0001).unwrap().generation(), 1);
        assert_eq!(ChipId::from_id_rev(0x0118_0002).unwrap().generation(), 2);
        // Newer steppings are treated like A1
        let newer = ChipId::from_id_rev(0x0118_0007).unwrap();
        assert_eq!(newer.generation(), 2);
        assert_eq!(newer.overrun_interrupt(), INT_RDFO);
    }

    #[test]
    fn test_concord_only_parts_reject_rev0() {
        assert_eq!(
            ChipId::from_id_rev(0x0116_0000),
            Err(NetworkError::UnsupportedChip(0x0116_0000))
        );
        assert_eq!(ChipId::from_id_rev(0x0112_0001).unwrap().model(), ChipModel::Lan9112);
    }

    #[test]
    fn test_lan921x_is_generation_3() {
        let chip = ChipId::from_id_rev(0x117A_0001).unwrap();
        assert_eq!(chip.model(), ChipModel::Lan9217);
        assert_eq!(chip.generation(), 3);
        assert!(chip.supports_external_phy());
        assert!(!ChipId::from_id_rev(0x118A_0000).unwrap().supports_external_phy());
    }

    #[test]
    fn test_mirrored_halves_mean_no_chip() {
        assert_eq!(
            ChipId::from_id_rev(0x0118_0118),
            Err(NetworkError::HardwareNotPresent)
        );
        assert_eq!(
            ChipId::from_id_rev(0xFFFF_FFFF),
            Err(NetworkError::HardwareNotPresent)
        );
        assert_eq!(
            ChipId::from_id_rev(0x9220_0000),
            Err(NetworkError::UnsupportedChip(0x9220_0000))
        );
    }

    #[test]
    fn test_external_phy_support() {
        assert!(!ChipId::from_id_rev(0x0117_0000).unwrap().supports_external_phy());
        assert!(ChipId::from_id_rev(0x0115_0002).unwrap().supports_external_phy());
        assert!(!ChipId::from_id_rev(0x0118_0002).unwrap().supports_external_phy());
    }

    #[test]
    fn test_legacy_fpga_register_map() {
        let chip = ChipId::from_id_rev(0x0118_0000).unwrap();
        assert!(!chip.legacy_registers());
        assert!(!chip.hardware_fast_forward());

        let old = chip.with_fpga_rev(0x0000_0120);
        assert_eq!(old.fpga_rev(), 0x20);
        assert!(old.legacy_registers());
        assert_eq!(old.int_cfg_reserved(), INT_CFG_RESERVED_LEGACY);

        let late = chip.with_fpga_rev(0x36);
        assert!(!late.legacy_registers());
        assert!(late.hardware_fast_forward());
    }
}
