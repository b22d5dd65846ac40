//! PHY link management
//!
//! The link manager owns the PHY: it picks the internal or an external
//! transceiver, resets it, programs autonegotiation (or forces a mode) and
//! then polls the link once a second from the platform's link timer. When
//! the negotiated speed or duplex changes it rewrites MAC_CR's duplex bits
//! and the pause-frame configuration, and opens or closes the transmit
//! queue.
//!
//! ```text
//!            restart autoneg
//!   Down ───────────────────────▶ Negotiating
//!    ▲  ╲                              │ link status + common mode
//!    │   ╲ forced mode, link status    ▼
//!    └─────────────────────────── Up(speed, duplex)
//!           link lost
//! ```
//!
//! Everything here runs under the MAC/PHY lock; the PHY interrupt is not
//! used.

use super::bus::{Lan, RegisterBus};
use super::config::PhySelect;
use super::mac::{MacPhyGuard, RegisterError};
use super::platform::Platform;
use super::regs::*;
use super::tx::QueueStop;
use super::Controller;
use crate::drivers::net::NetworkError;
use core::fmt;
use core::sync::atomic::Ordering;
use log::{debug, info, warn};

/// Link timer period
pub const LINK_POLL_PERIOD_MS: u32 = 1000;

/// 10 µs polls of BCR.RESET before a PHY reset is given up on
const PHY_RESET_POLLS: u32 = 100_000;

// ============================================================================
// Link Modes
// ============================================================================

/// Set of link capabilities: speeds, pause kinds, autonegotiation
///
/// Used both for what the configuration requests and for what the PHY
/// reports. A resolved link speed is a set with exactly one speed bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkModes(u8);

impl LinkModes {
    pub const SPEED_10HD: Self = Self(0x01);
    pub const SPEED_10FD: Self = Self(0x02);
    pub const SPEED_100HD: Self = Self(0x04);
    pub const SPEED_100FD: Self = Self(0x08);
    pub const SYMMETRIC_PAUSE: Self = Self(0x10);
    pub const ASYMMETRIC_PAUSE: Self = Self(0x20);
    pub const AUTO_NEGOTIATE: Self = Self(0x40);
    pub const ALL: Self = Self(0x7F);

    const SPEEDS: u8 = 0x0F;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// `None` if `bits` has anything outside `ALL`
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 != 0 {
            None
        } else {
            Some(Self(bits))
        }
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Fastest speed in the set, full duplex preferred
    pub const fn fastest(self) -> Self {
        let speeds = self.0 & Self::SPEEDS;
        if speeds & Self::SPEED_100FD.0 != 0 {
            Self::SPEED_100FD
        } else if speeds & Self::SPEED_100HD.0 != 0 {
            Self::SPEED_100HD
        } else if speeds & Self::SPEED_10FD.0 != 0 {
            Self::SPEED_10FD
        } else if speeds & Self::SPEED_10HD.0 != 0 {
            Self::SPEED_10HD
        } else {
            Self::empty()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Speed10,
    Speed100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexMode {
    Half,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub speed: LinkSpeed,
    pub duplex: DuplexMode,
}

impl LinkParams {
    /// Decode a single-speed `LinkModes`
    pub fn from_modes(modes: LinkModes) -> Option<Self> {
        let (speed, duplex) = match modes.fastest() {
            LinkModes::SPEED_100FD => (LinkSpeed::Speed100, DuplexMode::Full),
            LinkModes::SPEED_100HD => (LinkSpeed::Speed100, DuplexMode::Half),
            LinkModes::SPEED_10FD => (LinkSpeed::Speed10, DuplexMode::Full),
            LinkModes::SPEED_10HD => (LinkSpeed::Speed10, DuplexMode::Half),
            _ => return None,
        };
        Some(Self { speed, duplex })
    }
}

impl fmt::Display for LinkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let speed = match self.speed {
            LinkSpeed::Speed10 => 10,
            LinkSpeed::Speed100 => 100,
        };
        let duplex = match self.duplex {
            DuplexMode::Half => "HD",
            DuplexMode::Full => "FD",
        };
        write!(f, "{}Mbps {}", speed, duplex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    /// Autonegotiation restarted, no link yet
    Negotiating,
    Up(LinkParams),
}

// ============================================================================
// Pause Resolution
// ============================================================================

/// How the MAC handles congestion on the current link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    /// Send and honour pause frames
    Symmetric,
    /// Honour received pause frames, never send them
    RespondOnly,
    /// Half duplex: jam the wire instead of pausing
    Backpressure,
    Disabled,
}

/// Full-duplex pause outcome from our advertisement and the partner's
pub fn resolve_pause(local: u16, partner: u16) -> FlowMode {
    if local & partner & PHY_ANEG_ADV_SYMP != 0 {
        FlowMode::Symmetric
    } else if local & PHY_ANEG_ADV_PAUSE == PHY_ANEG_ADV_PAUSE
        && partner & PHY_ANEG_ADV_PAUSE == PHY_ANEG_LPA_ASYMP
    {
        FlowMode::RespondOnly
    } else {
        FlowMode::Disabled
    }
}

/// What PHY_ID_1/PHY_ID_2 report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyIdentity {
    /// OUI bits in the driver's historical packing
    pub id: u32,
    pub model: u8,
    pub revision: u8,
}

impl PhyIdentity {
    pub fn from_registers(id1: u16, id2: u16) -> Self {
        Self {
            id: (((id2 as u32) & 0xFC00) << 8) | ((id1 as u32) << 2),
            model: ((id2 >> 4) & 0x3F) as u8,
            revision: (id2 & 0x0F) as u8,
        }
    }

    pub fn is_lan9118(&self) -> bool {
        self.id == LAN9118_PHY_ID
    }
}

// ============================================================================
// PHY Register Operations
// ============================================================================

impl<B: RegisterBus> Lan<B> {
    /// Program the requested link modes and (re)start the link
    pub fn configure_link(
        &self,
        held: &mut MacPhyGuard<'_>,
        request: LinkModes,
    ) -> Result<(), RegisterError> {
        if request.contains(LinkModes::AUTO_NEGOTIATE) {
            let mut adv = self.phy_read(held, PHY_ANEG_ADV)?;

            adv &= !PHY_ANEG_ADV_PAUSE;
            if request.contains(LinkModes::ASYMMETRIC_PAUSE) {
                adv |= PHY_ANEG_ADV_ASYMP;
            }
            if request.contains(LinkModes::SYMMETRIC_PAUSE) {
                adv |= PHY_ANEG_ADV_SYMP;
            }

            adv &= !PHY_ANEG_ADV_SPEED;
            if request.contains(LinkModes::SPEED_10HD) {
                adv |= PHY_ANEG_ADV_10H;
            }
            if request.contains(LinkModes::SPEED_10FD) {
                adv |= PHY_ANEG_ADV_10F;
            }
            if request.contains(LinkModes::SPEED_100HD) {
                adv |= PHY_ANEG_ADV_100H;
            }
            if request.contains(LinkModes::SPEED_100FD) {
                adv |= PHY_ANEG_ADV_100F;
            }

            self.phy_write(held, PHY_ANEG_ADV, adv)?;
            held.remote_fault_count = 0;
            self.phy_write(held, PHY_BCR, PHY_BCR_AUTO_NEG_ENABLE | PHY_BCR_RESTART_AUTO_NEG)?;
            held.link_state = LinkState::Negotiating;
        } else {
            let forced = request.fastest();
            let mut bcr = 0;
            if forced.intersects(LinkModes::SPEED_10FD.union(LinkModes::SPEED_100FD)) {
                bcr |= PHY_BCR_DUPLEX_MODE;
            }
            if forced.intersects(LinkModes::SPEED_100HD.union(LinkModes::SPEED_100FD)) {
                bcr |= PHY_BCR_SPEED_SELECT;
            }
            self.phy_write(held, PHY_BCR, bcr)?;
            held.link_state = LinkState::Down;
        }
        Ok(())
    }

    /// Read the PHY's view of the link into `held`
    ///
    /// Updates `link_speed` (one speed bit, or empty when down),
    /// `link_settings` and `link_state`.
    pub fn read_link_mode(&self, held: &mut MacPhyGuard<'_>) -> Result<(), RegisterError> {
        let bsr = self.phy_read(held, PHY_BSR)?;
        held.link_settings = LinkModes::empty();

        if bsr & PHY_BSR_REMOTE_FAULT != 0 {
            held.remote_fault_count = held.remote_fault_count.wrapping_add(1);
            warn!("[PHY] remote fault reported ({} so far)", held.remote_fault_count);
        }

        let mut speed = LinkModes::empty();
        if bsr & PHY_BSR_LINK_STATUS != 0 {
            let bcr = self.phy_read(held, PHY_BCR)?;
            if bcr & PHY_BCR_AUTO_NEG_ENABLE != 0 {
                let adv = held.last_adv_at_restart;
                let lpa = self.phy_read(held, PHY_ANEG_LPA)?;

                let settings = LinkModes::AUTO_NEGOTIATE.union(adv_to_modes(adv));
                held.link_settings = settings;
                speed = adv_to_modes(lpa & adv).fastest();
            } else {
                speed = match (bcr & PHY_BCR_SPEED_SELECT != 0, bcr & PHY_BCR_DUPLEX_MODE != 0) {
                    (true, true) => LinkModes::SPEED_100FD,
                    (true, false) => LinkModes::SPEED_100HD,
                    (false, true) => LinkModes::SPEED_10FD,
                    (false, false) => LinkModes::SPEED_10HD,
                };
                held.link_settings = speed;
            }
        }

        held.link_speed = speed;
        held.link_state = match LinkParams::from_modes(speed) {
            Some(params) => LinkState::Up(params),
            None if matches!(held.link_state, LinkState::Up(_)) => LinkState::Down,
            None => held.link_state,
        };
        Ok(())
    }

    /// MAC_CR duplex bits for a new link; returns how pause should be set up
    pub fn apply_link_duplex(
        &self,
        held: &MacPhyGuard<'_>,
        params: LinkParams,
    ) -> Result<FlowMode, RegisterError> {
        let duplex_bit = match params.duplex {
            DuplexMode::Half => MAC_CR_RCVOWN,
            DuplexMode::Full => MAC_CR_FDPX,
        };
        self.mac_modify(held, MAC_CR, MAC_CR_FDPX | MAC_CR_RCVOWN, duplex_bit)?;

        if params.duplex == DuplexMode::Half {
            return Ok(FlowMode::Backpressure);
        }
        if !held.link_settings.contains(LinkModes::AUTO_NEGOTIATE) {
            return Ok(FlowMode::Disabled);
        }
        let local = self.phy_read(held, PHY_ANEG_ADV)?;
        let partner = self.phy_read(held, PHY_ANEG_LPA)?;
        Ok(resolve_pause(local, partner))
    }

    /// Program FLOW and AFC_CFG's trigger bits for `mode`
    ///
    /// `pause_bits` are the AFC_CFG FC* bits to use when the MAC may
    /// initiate flow control.
    pub fn apply_flow_mode(
        &self,
        held: &MacPhyGuard<'_>,
        mode: FlowMode,
        pause_bits: u32,
    ) -> Result<(), RegisterError> {
        let (flow, afc_on) = match mode {
            FlowMode::Symmetric => (FLOW_PAUSE_ENABLED, true),
            FlowMode::RespondOnly => (FLOW_PAUSE_ENABLED, false),
            FlowMode::Backpressure => (0, true),
            FlowMode::Disabled => (0, false),
        };
        self.mac_write(held, FLOW, flow)?;

        let afc = self.read(AFC_CFG) & !AFC_CFG_FC_MASK;
        self.write(AFC_CFG, if afc_on { afc | (pause_bits & AFC_CFG_FC_MASK) } else { afc });
        Ok(())
    }
}

/// Speed and pause bits of an advertisement or partner ability word
fn adv_to_modes(word: u16) -> LinkModes {
    let table = [
        (PHY_ANEG_ADV_ASYMP, LinkModes::ASYMMETRIC_PAUSE),
        (PHY_ANEG_ADV_SYMP, LinkModes::SYMMETRIC_PAUSE),
        (PHY_ANEG_LPA_100FDX, LinkModes::SPEED_100FD),
        (PHY_ANEG_LPA_100HDX, LinkModes::SPEED_100HD),
        (PHY_ANEG_LPA_10FDX, LinkModes::SPEED_10FD),
        (PHY_ANEG_LPA_10HDX, LinkModes::SPEED_10HD),
    ];
    table
        .iter()
        .filter(|(bit, _)| word & bit != 0)
        .fold(LinkModes::empty(), |modes, &(_, mode)| modes.union(mode))
}

// ============================================================================
// Link Manager
// ============================================================================

impl<B: RegisterBus, P: Platform> Controller<B, P> {
    /// Select, reset and configure the PHY, then start link polling
    pub(super) fn phy_initialize(&self) -> Result<(), NetworkError> {
        let address = self.select_phy();

        let mut held = self.lan.acquire_mac_phy();
        held.phy_address = address;

        let id2 = self
            .lan
            .phy_read(&held, PHY_ID_2)
            .unwrap_or_else(RegisterError::mii_sentinel);
        let id1 = self
            .lan
            .phy_read(&held, PHY_ID_1)
            .unwrap_or_else(RegisterError::mii_sentinel);
        let identity = PhyIdentity::from_registers(id1, id2);
        debug!(
            "[PHY] id 0x{:08X} model 0x{:02X} rev 0x{:02X} at address {}",
            identity.id, identity.model, identity.revision, address
        );
        self.resources.lock().phy = Some(identity);

        held.link_speed = LinkModes::empty();
        held.link_settings = LinkModes::empty();
        held.link_state = LinkState::Down;

        if let Err(e) = self.lan.phy_write(&mut held, PHY_BCR, PHY_BCR_RESET) {
            warn!("[PHY] reset not issued: {}", e);
            return Err(e.into());
        }
        let mut bcr = PHY_BCR_RESET;
        for _ in 0..PHY_RESET_POLLS {
            self.platform.delay_us(10);
            bcr = self
                .lan
                .phy_read(&held, PHY_BCR)
                .unwrap_or_else(RegisterError::mii_sentinel);
            if bcr & PHY_BCR_RESET == 0 {
                break;
            }
        }
        if bcr & PHY_BCR_RESET != 0 {
            warn!("[PHY] reset failed to complete");
            return Err(NetworkError::Timeout);
        }

        if let Err(e) = self.lan.configure_link(&mut held, self.config.link_mode) {
            warn!("[PHY] link configuration {}", e);
            return Err(NetworkError::HardwareError);
        }
        drop(held);

        self.stop_link_polling.store(false, Ordering::Release);
        self.platform.arm_link_timer(LINK_POLL_PERIOD_MS);
        Ok(())
    }

    /// MII address of the PHY to drive, switching HW_CFG over if external
    fn select_phy(&self) -> u8 {
        let wanted = self.config.phy;
        if wanted == PhySelect::Internal {
            return INTERNAL_PHY_ADDRESS;
        }
        if !self.chip.supports_external_phy() {
            warn!("[PHY] {} has no external PHY support, using internal PHY", self.chip.model());
            return INTERNAL_PHY_ADDRESS;
        }
        if self.lan.read(HW_CFG) & HW_CFG_EXT_PHY_DET == 0 {
            warn!("[PHY] no external PHY detected, using internal PHY");
            return INTERNAL_PHY_ADDRESS;
        }

        // Rx and Tx are not running yet, so the MII clock can be switched
        self.switch_phy_clock(true);

        let found = {
            let held = self.lan.acquire_mac_phy();
            let responds = |address: u8| {
                let id1 = self
                    .lan
                    .phy_read_at(&held, address, PHY_ID_1)
                    .unwrap_or_else(RegisterError::mii_sentinel);
                let id2 = self
                    .lan
                    .phy_read_at(&held, address, PHY_ID_2)
                    .unwrap_or_else(RegisterError::mii_sentinel);
                id1 != 0xFFFF || id2 != 0xFFFF
            };
            match wanted {
                PhySelect::External(address) => responds(address).then_some(address),
                _ => {
                    let found = (0..=31).find(|&address| responds(address));
                    if found.is_none() {
                        warn!("[PHY] failed to auto detect external PHY");
                    }
                    found
                }
            }
        };

        match found {
            Some(address) => {
                info!("[PHY] using external PHY at address {}", address);
                address
            }
            None => {
                warn!("[PHY] external PHY not accessible, using internal PHY");
                self.switch_phy_clock(false);
                INTERNAL_PHY_ADDRESS
            }
        }
    }

    /// Move the MII clock and SMI between the internal and external PHY
    fn switch_phy_clock(&self, external: bool) {
        let mut hw_cfg = self.lan.read(HW_CFG);

        hw_cfg = (hw_cfg & !HW_CFG_PHY_CLK_SEL) | HW_CFG_PHY_CLK_SEL_CLK_DIS;
        self.lan.write(HW_CFG, hw_cfg);
        self.platform.delay_us(10);

        if external {
            hw_cfg |= HW_CFG_EXT_PHY_EN;
        } else {
            hw_cfg &= !HW_CFG_EXT_PHY_EN;
        }
        self.lan.write(HW_CFG, hw_cfg);

        let clock = if external {
            HW_CFG_PHY_CLK_SEL_EXT_PHY
        } else {
            HW_CFG_PHY_CLK_SEL_INT_PHY
        };
        hw_cfg = (hw_cfg & !HW_CFG_PHY_CLK_SEL) | clock;
        self.lan.write(HW_CFG, hw_cfg);
        self.platform.delay_us(10);

        if external {
            hw_cfg |= HW_CFG_SMI_SEL;
        } else {
            hw_cfg &= !HW_CFG_SMI_SEL;
        }
        self.lan.write(HW_CFG, hw_cfg);
    }

    /// Re-read the link and reconfigure the MAC if it changed
    pub fn update_link_mode(&self) {
        let mut held = self.lan.acquire_mac_phy();
        let old = held.link_speed;
        if let Err(e) = self.lan.read_link_mode(&mut held) {
            warn!("[PHY] link status read {}", e);
            return;
        }
        if held.link_speed == old {
            return;
        }

        match LinkParams::from_modes(held.link_speed) {
            Some(params) => {
                info!("[PHY] link up at {}", params);
                let configured = self
                    .lan
                    .apply_link_duplex(&held, params)
                    .and_then(|mode| {
                        debug!("[PHY] flow mode {:?}", mode);
                        self.lan.apply_flow_mode(&held, mode, self.config.afc_pause_bits())
                    });
                if let Err(e) = configured {
                    warn!("[PHY] MAC link configuration {}", e);
                }
                self.wake_queue(QueueStop::LINK);
            }
            None => {
                info!("[PHY] link down");
                self.stop_queue(QueueStop::LINK);
                if let Err(e) = self.lan.apply_flow_mode(&held, FlowMode::Disabled, 0) {
                    warn!("[PHY] flow control reset {}", e);
                }
            }
        }
    }

    /// Link timer expiry
    ///
    /// Reads twice so a partner ability change that raced the first read
    /// settles, then re-arms unless the controller is stopping.
    pub fn on_link_timer(&self) {
        self.update_link_mode();
        self.update_link_mode();
        if !self.stop_link_polling.load(Ordering::Acquire) {
            self.platform.arm_link_timer(LINK_POLL_PERIOD_MS);
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.lan.acquire_mac_phy().link_state
    }

    /// Remote faults seen since autonegotiation was last restarted
    pub fn remote_fault_count(&self) -> u32 {
        self.lan.acquire_mac_phy().remote_fault_count
    }

    pub fn phy_identity(&self) -> Option<PhyIdentity> {
        self.resources.lock().phy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::net::ethernet::smsc::lan911x::config::ControllerConfig;
    use crate::drivers::net::ethernet::smsc::lan911x::sim::{SimBus, setup, setup_chip};

    const LPA_100FD_SYM: u16 = PHY_ANEG_LPA_100FDX | PHY_ANEG_LPA_SYMP | 0x0001;

    #[test]
    fn test_link_modes() {
        let modes = LinkModes::SPEED_10HD.union(LinkModes::SPEED_100HD);
        assert_eq!(modes.fastest(), LinkModes::SPEED_100HD);
        assert!(modes.contains(LinkModes::SPEED_10HD));
        assert!(!modes.contains(LinkModes::SPEED_100FD));
        assert_eq!(LinkModes::from_bits(0x80), None);
        assert_eq!(LinkModes::empty().fastest(), LinkModes::empty());
        assert_eq!(
            LinkParams::from_modes(LinkModes::SPEED_10FD),
            Some(LinkParams {
                speed: LinkSpeed::Speed10,
                duplex: DuplexMode::Full
            })
        );
    }

    #[test]
    fn test_pause_resolution_table() {
        let both = PHY_ANEG_ADV_SYMP | PHY_ANEG_ADV_ASYMP;
        assert_eq!(resolve_pause(both, PHY_ANEG_LPA_SYMP), FlowMode::Symmetric);
        assert_eq!(resolve_pause(PHY_ANEG_ADV_SYMP, both), FlowMode::Symmetric);
        assert_eq!(resolve_pause(both, PHY_ANEG_LPA_ASYMP), FlowMode::RespondOnly);
        assert_eq!(resolve_pause(PHY_ANEG_ADV_ASYMP, PHY_ANEG_LPA_ASYMP), FlowMode::Disabled);
        assert_eq!(resolve_pause(PHY_ANEG_ADV_SYMP, 0), FlowMode::Disabled);
    }

    #[test]
    fn test_phy_identity_packing() {
        let identity = PhyIdentity::from_registers(0x0007, 0xC0C3);
        assert!(identity.is_lan9118());
        assert_eq!(identity.model, 0x0C);
        assert_eq!(identity.revision, 3);
    }

    #[test]
    fn test_autoneg_advertisement() {
        let bus = SimBus::new(0x0118_0002);
        let lan = Lan::new(bus.clone());
        let mut held = lan.acquire_mac_phy();
        let request = LinkModes::AUTO_NEGOTIATE
            .union(LinkModes::SYMMETRIC_PAUSE)
            .union(LinkModes::SPEED_100FD)
            .union(LinkModes::SPEED_10HD);
        lan.configure_link(&mut held, request).unwrap();

        let phy = bus.chip().phy(1);
        let adv = phy[PHY_ANEG_ADV as usize];
        assert_eq!(adv & PHY_ANEG_ADV_PAUSE, PHY_ANEG_ADV_SYMP);
        assert_eq!(adv & PHY_ANEG_ADV_SPEED, PHY_ANEG_ADV_100F | PHY_ANEG_ADV_10H);
        assert_ne!(phy[PHY_BCR as usize] & PHY_BCR_AUTO_NEG_ENABLE, 0);
        assert_eq!(held.last_adv_at_restart, adv);
        assert_eq!(held.link_state, LinkState::Negotiating);
    }

    #[test]
    fn test_forced_mode_picks_fastest() {
        let bus = SimBus::new(0x0118_0002);
        let lan = Lan::new(bus.clone());
        let mut held = lan.acquire_mac_phy();
        let request = LinkModes::SPEED_10FD.union(LinkModes::SPEED_100HD);
        lan.configure_link(&mut held, request).unwrap();
        assert_eq!(bus.chip().phy(1)[PHY_BCR as usize], PHY_BCR_SPEED_SELECT);

        bus.chip().set_link(true, 0);
        lan.read_link_mode(&mut held).unwrap();
        assert_eq!(held.link_speed, LinkModes::SPEED_100HD);
        assert_eq!(held.link_settings, LinkModes::SPEED_100HD);
    }

    #[test]
    fn test_negotiated_speed_is_highest_common() {
        let bus = SimBus::new(0x0118_0002);
        let lan = Lan::new(bus.clone());
        let mut held = lan.acquire_mac_phy();
        let request = LinkModes::AUTO_NEGOTIATE
            .union(LinkModes::SPEED_100HD)
            .union(LinkModes::SPEED_10FD);
        lan.configure_link(&mut held, request).unwrap();

        // Partner can do everything; we only offered 100HD and 10FD
        bus.chip().set_link(true, 0x01E1);
        lan.read_link_mode(&mut held).unwrap();
        assert_eq!(held.link_speed, LinkModes::SPEED_100HD);
        assert!(held.link_settings.contains(LinkModes::AUTO_NEGOTIATE));
        assert!(matches!(held.link_state, LinkState::Up(_)));

        bus.chip().set_link(false, 0);
        lan.read_link_mode(&mut held).unwrap();
        assert!(held.link_speed.is_empty());
        assert_eq!(held.link_state, LinkState::Down);
    }

    #[test]
    fn test_remote_faults_are_counted() {
        let bus = SimBus::new(0x0118_0002);
        let lan = Lan::new(bus.clone());
        let mut held = lan.acquire_mac_phy();
        bus.chip().remote_fault = true;
        lan.read_link_mode(&mut held).unwrap();
        lan.read_link_mode(&mut held).unwrap();
        assert_eq!(held.remote_fault_count, 2);
    }

    #[test]
    fn test_link_up_configures_mac_and_wakes_queue() {
        let h = setup(ControllerConfig::new());
        h.open();
        assert!(h.controller.queue_stopped());

        h.bus.chip().set_link(true, LPA_100FD_SYM);
        h.controller.on_link_timer();

        let chip = h.bus.chip();
        assert_ne!(chip.mac[MAC_CR as usize] & MAC_CR_FDPX, 0);
        assert_eq!(chip.mac[MAC_CR as usize] & MAC_CR_RCVOWN, 0);
        assert_eq!(chip.mac[FLOW as usize], FLOW_PAUSE_ENABLED);
        assert_eq!(chip.reg(AFC_CFG) & AFC_CFG_FC_MASK, 0xF);
        drop(chip);

        assert!(!h.controller.queue_stopped());
        assert_eq!(h.platform.wakes(), 1);
        assert_eq!(h.platform.link_timer(), Some(LINK_POLL_PERIOD_MS));
        assert_eq!(
            h.controller.link_state(),
            LinkState::Up(LinkParams {
                speed: LinkSpeed::Speed100,
                duplex: DuplexMode::Full
            })
        );
    }

    #[test]
    fn test_half_duplex_uses_backpressure() {
        let h = setup(ControllerConfig::new());
        h.open();
        h.bus.chip().set_link(true, PHY_ANEG_LPA_10HDX | PHY_ANEG_LPA_SYMP);
        h.controller.update_link_mode();

        let chip = h.bus.chip();
        assert_ne!(chip.mac[MAC_CR as usize] & MAC_CR_RCVOWN, 0);
        assert_eq!(chip.mac[FLOW as usize], 0);
        assert_eq!(chip.reg(AFC_CFG) & AFC_CFG_FC_MASK, 0xF);
    }

    #[test]
    fn test_link_loss_stops_queue() {
        let h = setup(ControllerConfig::new());
        h.open();
        h.bus.chip().set_link(true, LPA_100FD_SYM);
        h.controller.update_link_mode();
        assert!(!h.controller.queue_stopped());

        h.bus.chip().set_link(false, 0);
        h.controller.update_link_mode();
        assert!(h.controller.queue_stopped());
        assert_eq!(h.bus.chip().mac[FLOW as usize], 0);
        assert_eq!(h.bus.chip().reg(AFC_CFG) & AFC_CFG_FC_MASK, 0);
        assert_eq!(h.controller.link_state(), LinkState::Down);
    }

    #[test]
    fn test_unchanged_link_leaves_mac_alone() {
        let h = setup(ControllerConfig::new());
        h.open();
        h.bus.chip().set_link(true, LPA_100FD_SYM);
        h.controller.update_link_mode();
        h.bus.chip().mac[FLOW as usize] = 0x1234;
        h.controller.update_link_mode();
        assert_eq!(h.bus.chip().mac[FLOW as usize], 0x1234);
    }

    #[test]
    fn test_external_phy_auto_detect() {
        let config = ControllerConfig::new().with_phy(PhySelect::AutoDetect);
        let h = setup_chip(0x117A_0001, config);
        h.bus.chip().add_external_phy(3, 0x0022, 0x1619);
        h.open();

        assert_eq!(h.controller.lan.acquire_mac_phy().phy_address, 3);
        let hw_cfg = h.bus.chip().reg(HW_CFG);
        assert_ne!(hw_cfg & HW_CFG_SMI_SEL, 0);
        assert_eq!(hw_cfg & HW_CFG_PHY_CLK_SEL, HW_CFG_PHY_CLK_SEL_EXT_PHY);
        assert_eq!(h.controller.phy_identity().map(|id| id.model), Some(0x21));
    }

    #[test]
    fn test_missing_external_phy_falls_back() {
        let config = ControllerConfig::new().with_phy(PhySelect::External(4));
        let h = setup_chip(0x117A_0001, config);
        h.bus.chip().ext_phy_detect = true;
        h.open();

        assert_eq!(h.controller.lan.acquire_mac_phy().phy_address, INTERNAL_PHY_ADDRESS);
        let hw_cfg = h.bus.chip().reg(HW_CFG);
        assert_eq!(hw_cfg & (HW_CFG_SMI_SEL | HW_CFG_EXT_PHY_EN | HW_CFG_PHY_CLK_SEL), 0);
        assert!(h.controller.phy_identity().is_some_and(|id| id.is_lan9118()));
    }

    #[test]
    fn test_external_phy_unsupported_chip() {
        let config = ControllerConfig::new().with_phy(PhySelect::AutoDetect);
        let h = setup(config);
        h.bus.chip().add_external_phy(3, 0x0022, 0x1619);
        h.open();
        assert_eq!(h.controller.lan.acquire_mac_phy().phy_address, INTERNAL_PHY_ADDRESS);
        assert_eq!(h.bus.chip().reg(HW_CFG) & HW_CFG_SMI_SEL, 0);
    }

    #[test]
    fn test_failed_reset_write_fails_open() {
        let h = setup(ControllerConfig::new());
        h.bus.chip().mii_writes_stuck = true;

        assert_eq!(h.controller.open(), Err(NetworkError::Timeout));
        assert!(!h.controller.is_running());
        assert!(!h.platform.attached());
        assert_eq!(h.platform.link_timer(), None);
    }

    #[test]
    fn test_link_timer_stops_after_stop() {
        let h = setup(ControllerConfig::new());
        h.open();
        h.controller.stop();
        h.platform.clear_link_timer();
        h.controller.on_link_timer();
        assert_eq!(h.platform.link_timer(), None);
    }
}
