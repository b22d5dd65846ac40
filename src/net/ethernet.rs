//! Ethernet addressing
//!
//! MAC address representation plus the conversion to and from the
//! ADDRH/ADDRL register pair the LAN911x keeps its station address in.

use core::fmt;
use core::str::FromStr;

/// Maximum frame size handed to the controller (header + 1500 byte payload, no CRC)
pub const MAX_FRAME_SIZE: usize = 1514;

/// Ethernet header size: dest MAC (6) + src MAC (6) + ethertype (2)
pub const HEADER_SIZE: usize = 14;

/// 48-bit MAC (Media Access Control) address
///
/// Format: 6 bytes, displayed as XX:XX:XX:XX:XX:XX in hexadecimal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Broadcast MAC address (FF:FF:FF:FF:FF:FF)
    pub const fn broadcast() -> Self {
        Self([0xFF; 6])
    }

    pub const fn zero() -> Self {
        Self([0x00; 6])
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Check if this is a multicast address (bit 0 of first byte is 1)
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0x01) != 0
    }

    /// Usable as a station address: not zero, not multicast
    pub fn is_valid_station(&self) -> bool {
        !self.is_multicast() && self.0 != [0; 6]
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Build from the MAC's ADDRH/ADDRL pair
    ///
    /// ADDRL holds bytes 0..3 little-endian, ADDRH bytes 4..5 in its low half.
    pub const fn from_registers(addrh: u32, addrl: u32) -> Self {
        let lo = addrl.to_le_bytes();
        let hi = addrh.to_le_bytes();
        Self([lo[0], lo[1], lo[2], lo[3], hi[0], hi[1]])
    }

    /// Split into `(ADDRH, ADDRL)` register values
    pub const fn to_registers(&self) -> (u32, u32) {
        let b = self.0;
        let addrl = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let addrh = u32::from_le_bytes([b[4], b[5], 0, 0]);
        (addrh, addrl)
    }
}

/// Parse a MAC address from a colon-separated hex string
///
/// Example: "00:80:0F:11:70:00"
impl FromStr for MacAddress {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(())?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}
