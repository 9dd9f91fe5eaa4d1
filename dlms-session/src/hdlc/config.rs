//! HDLC link configuration

use crate::hdlc::address::{HdlcAddress, reserved};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest window allowed by 3-bit sequence numbers
pub const MAX_WINDOW_SIZE: u8 = 7;

/// Parameters for one HDLC link
///
/// Frames sent by the link carry `local_address` as source and
/// `remote_address` as destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdlcConfig {
    pub local_address: HdlcAddress,
    pub remote_address: HdlcAddress,
    /// Unacknowledged information frames allowed in flight, 1..=7
    pub window_size: u8,
    pub max_info_length: u16,
    /// How long `connect`, `disconnect` and `send_data` wait for the peer
    pub response_timeout: Duration,
}

impl Default for HdlcConfig {
    fn default() -> Self {
        Self {
            local_address: HdlcAddress::new(reserved::SERVER_UPPER_MANAGEMENT_LOGICAL_DEVICE, 0x11),
            remote_address: HdlcAddress::client(reserved::CLIENT_PUBLIC_CLIENT),
            window_size: 1,
            max_info_length: 128,
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl HdlcConfig {
    pub fn new(local_address: HdlcAddress, remote_address: HdlcAddress) -> Self {
        Self {
            local_address,
            remote_address,
            ..Self::default()
        }
    }

    /// Set the window size, clamped to 1..=7
    pub fn with_window_size(mut self, window_size: u8) -> Self {
        self.window_size = window_size.clamp(1, MAX_WINDOW_SIZE);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_info_length(mut self, length: u16) -> Self {
        self.max_info_length = length;
        self
    }

    /// Window size as used by the link, never below 1
    pub fn effective_window_size(&self) -> usize {
        usize::from(self.window_size.clamp(1, MAX_WINDOW_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_is_clamped() {
        assert_eq!(HdlcConfig::default().with_window_size(0).window_size, 1);
        assert_eq!(HdlcConfig::default().with_window_size(9).window_size, 7);
        let raw = HdlcConfig {
            window_size: 0,
            ..HdlcConfig::default()
        };
        assert_eq!(raw.effective_window_size(), 1);
    }
}
