//! HDLC address types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved HDLC addresses
pub mod reserved {
    /// Guaranteed to be received by no one
    pub const NO_STATION: u8 = 0x00;

    /// Client management process
    pub const CLIENT_MANAGEMENT_PROCESS: u8 = 0x01;

    /// Client public client
    pub const CLIENT_PUBLIC_CLIENT: u8 = 0x10;

    /// Server upper management logical device
    pub const SERVER_UPPER_MANAGEMENT_LOGICAL_DEVICE: u8 = 0x01;

    /// Broadcast to all stations
    pub const ALL_STATIONS: u8 = 0x7F;
}

/// HDLC address carried as a 16-bit field of upper and lower bytes
///
/// For server addresses the upper byte is the logical device and the lower
/// byte the physical device. Client addresses only use the lower byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HdlcAddress {
    pub upper: u8,
    pub lower: u8,
}

impl HdlcAddress {
    pub const fn new(upper: u8, lower: u8) -> Self {
        Self { upper, lower }
    }

    /// Client address with a zero upper byte
    pub const fn client(lower: u8) -> Self {
        Self { upper: 0, lower }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.upper, self.lower]
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            upper: bytes[0],
            lower: bytes[1],
        }
    }
}

impl fmt::Display for HdlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}", self.upper, self.lower)
    }
}
