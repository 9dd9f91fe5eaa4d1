//! HDLC link state machine

use std::fmt;

/// HDLC link state
///
/// ```text
/// Disconnected -> Connecting     (connect)
/// Connecting   -> Connected      (UA received, or the peer's SNRM crossed ours)
/// Disconnected -> Connected      (peer SNRM answered with UA)
/// Connected    -> Disconnecting  (disconnect)
/// Disconnecting -> Disconnected  (UA received, timeout or failure)
/// any          -> Disconnected   (link failure, peer DISC or DM)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No link established (initial state)
    #[default]
    Disconnected,
    /// SNRM sent, waiting for UA
    Connecting,
    /// Information frames may flow
    Connected,
    /// DISC sent, waiting for UA
    Disconnecting,
}

impl LinkState {
    /// Check if the link is ready for data transmission
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Disconnecting => "Disconnecting",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_default() {
        assert_eq!(LinkState::default(), LinkState::Disconnected);
        assert!(!LinkState::default().is_connected());
    }
}
