//! Events emitted by an HDLC link

use bytes::Bytes;
use dlms_core::DlmsError;

/// Notification from an [`HdlcLink`](crate::hdlc::HdlcLink) to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum HdlcEvent {
    /// The link reached the connected state
    Connected,
    /// The link went back to the disconnected state
    Disconnected,
    /// An in-sequence information frame delivered its payload
    DataReceived(Bytes),
    /// The peer sent RNR; sending is paused until the next RR
    PeerBusy,
    /// The peer rejected frames from this N(R) onwards
    Rejected(u8),
    /// The peer sent FRMR
    FrameRejected,
    /// A link-level failure tore the link down
    Error(DlmsError),
}

impl HdlcEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, HdlcEvent::Error(_))
    }
}
