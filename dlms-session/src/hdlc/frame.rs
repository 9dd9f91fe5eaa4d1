//! HDLC frame structure and encoding/decoding
//!
//! Wire layout, with flags and byte escaping around everything in between:
//!
//! ```text
//! 7E | format | dest(2) | src(2) | control | HCS(2) | payload | FCS(2) | 7E
//! ```
//!
//! HCS covers format through control, FCS covers format through payload
//! (including the HCS). Bytes equal to the flag or the escape byte are sent as
//! `7D, byte ^ 0x20`.

use crate::hdlc::address::HdlcAddress;
use crate::hdlc::fcs::{FcsCalc, crc16};
use bytes::{BufMut, Bytes, BytesMut};
use dlms_core::{DlmsError, DlmsResult};
use std::fmt;

/// HDLC frame flag
pub const FLAG: u8 = 0x7E;
/// Escape byte
pub const ESCAPE: u8 = 0x7D;
/// Mask applied to escaped bytes
pub const ESCAPE_MASK: u8 = 0x20;
/// Poll/final bit of the control byte
pub const POLL_FINAL: u8 = 0x10;

/// Sequence numbers are three bits wide
pub const SEQUENCE_MODULUS: u8 = 8;

const HEADER_LEN: usize = 6;

/// Advance a sequence number modulo 8
pub fn next_sequence(seq: u8) -> u8 {
    (seq + 1) % SEQUENCE_MODULUS
}

/// Frame format byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameFormat {
    /// Information frames
    Type1 = 0xA0,
    /// Supervisory frames
    Type2 = 0xB0,
    /// Unnumbered frames
    Type3 = 0xC0,
}

impl FrameFormat {
    pub fn from_byte(byte: u8) -> DlmsResult<Self> {
        match byte {
            0xA0 => Ok(FrameFormat::Type1),
            0xB0 => Ok(FrameFormat::Type2),
            0xC0 => Ok(FrameFormat::Type3),
            other => Err(DlmsError::FrameInvalid(format!(
                "unknown frame format 0x{:02X}",
                other
            ))),
        }
    }
}

/// HDLC frame type, valued by its control-byte code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Information = 0x00,
    ReceiveReady = 0x01,
    ReceiveNotReady = 0x05,
    Reject = 0x09,
    SetNormalResponseMode = 0x83,
    UnnumberedAcknowledge = 0x63,
    DisconnectMode = 0x0F,
    Disconnect = 0x43,
    FrameReject = 0x87,
}

impl FrameType {
    /// Get frame type from control byte
    pub fn from_control_byte(control: u8) -> DlmsResult<Self> {
        if control & 0x01 == 0 {
            return Ok(FrameType::Information);
        }
        if control & 0x03 == 0x01 {
            return match control & 0x0F {
                0x01 => Ok(FrameType::ReceiveReady),
                0x05 => Ok(FrameType::ReceiveNotReady),
                0x09 => Ok(FrameType::Reject),
                _ => Err(DlmsError::FrameInvalid(format!(
                    "unsupported supervisory control 0x{:02X}",
                    control
                ))),
            };
        }
        match control & !POLL_FINAL {
            0x83 => Ok(FrameType::SetNormalResponseMode),
            0x63 => Ok(FrameType::UnnumberedAcknowledge),
            0x0F => Ok(FrameType::DisconnectMode),
            0x43 => Ok(FrameType::Disconnect),
            0x87 => Ok(FrameType::FrameReject),
            _ => Err(DlmsError::FrameInvalid(format!(
                "unsupported unnumbered control 0x{:02X}",
                control
            ))),
        }
    }

    /// Format byte used for this frame type
    pub fn format(self) -> FrameFormat {
        match self {
            FrameType::Information => FrameFormat::Type1,
            FrameType::ReceiveReady | FrameType::ReceiveNotReady | FrameType::Reject => {
                FrameFormat::Type2
            }
            _ => FrameFormat::Type3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Information => "I",
            FrameType::ReceiveReady => "RR",
            FrameType::ReceiveNotReady => "RNR",
            FrameType::Reject => "REJ",
            FrameType::SetNormalResponseMode => "SNRM",
            FrameType::UnnumberedAcknowledge => "UA",
            FrameType::DisconnectMode => "DM",
            FrameType::Disconnect => "DISC",
            FrameType::FrameReject => "FRMR",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single HDLC frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    pub frame_type: FrameType,
    pub destination: HdlcAddress,
    pub source: HdlcAddress,
    /// N(S), only meaningful for information frames
    pub send_seq: u8,
    /// N(R), meaningful for information and supervisory frames
    pub recv_seq: u8,
    pub poll_final: bool,
    pub payload: Bytes,
}

impl HdlcFrame {
    /// Information frame carrying `payload`
    pub fn information(
        destination: HdlcAddress,
        source: HdlcAddress,
        send_seq: u8,
        recv_seq: u8,
        payload: Bytes,
    ) -> Self {
        Self {
            frame_type: FrameType::Information,
            destination,
            source,
            send_seq: send_seq % SEQUENCE_MODULUS,
            recv_seq: recv_seq % SEQUENCE_MODULUS,
            poll_final: true,
            payload,
        }
    }

    /// RR, RNR or REJ frame
    pub fn supervisory(
        frame_type: FrameType,
        destination: HdlcAddress,
        source: HdlcAddress,
        recv_seq: u8,
    ) -> Self {
        Self {
            frame_type,
            destination,
            source,
            send_seq: 0,
            recv_seq: recv_seq % SEQUENCE_MODULUS,
            poll_final: true,
            payload: Bytes::new(),
        }
    }

    /// SNRM, UA, DM, DISC or FRMR frame
    pub fn unnumbered(frame_type: FrameType, destination: HdlcAddress, source: HdlcAddress) -> Self {
        Self {
            frame_type,
            destination,
            source,
            send_seq: 0,
            recv_seq: 0,
            poll_final: true,
            payload: Bytes::new(),
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.frame_type.format()
    }

    /// Control byte: frame type code, P/F bit and the 3-bit sequence numbers
    pub fn control_byte(&self) -> u8 {
        let pf = if self.poll_final { POLL_FINAL } else { 0 };
        match self.format() {
            FrameFormat::Type1 => ((self.send_seq & 0x07) << 1) | ((self.recv_seq & 0x07) << 5) | pf,
            FrameFormat::Type2 => self.frame_type as u8 | ((self.recv_seq & 0x07) << 5) | pf,
            FrameFormat::Type3 => self.frame_type as u8 | pf,
        }
    }

    /// Encode the frame including flags and escaping
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(HEADER_LEN + 4 + self.payload.len());
        body.put_u8(self.format() as u8);
        body.put_slice(&self.destination.to_bytes());
        body.put_slice(&self.source.to_bytes());
        body.put_u8(self.control_byte());
        let hcs = crc16(&body[..HEADER_LEN]);
        body.put_u16_le(hcs);
        body.put_slice(&self.payload);
        let fcs = crc16(&body);
        body.put_u16_le(fcs);

        let mut wire = BytesMut::with_capacity(body.len() + 8);
        wire.put_u8(FLAG);
        for &byte in body.iter() {
            if byte == FLAG || byte == ESCAPE {
                wire.put_u8(ESCAPE);
                wire.put_u8(byte ^ ESCAPE_MASK);
            } else {
                wire.put_u8(byte);
            }
        }
        wire.put_u8(FLAG);
        wire.freeze()
    }

    /// Decode one frame delimited by flags
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::FrameInvalid`] on missing flags, a dangling escape,
    /// a short frame, a checksum mismatch or an unknown control byte.
    pub fn decode(raw: &[u8]) -> DlmsResult<Self> {
        let start = raw
            .iter()
            .position(|&b| b == FLAG)
            .ok_or_else(|| DlmsError::FrameInvalid("missing opening flag".into()))?;
        let end = raw
            .iter()
            .rposition(|&b| b == FLAG)
            .filter(|&end| end > start)
            .ok_or_else(|| DlmsError::FrameInvalid("missing closing flag".into()))?;

        let body = unescape(&raw[start + 1..end])?;
        if body.len() < HEADER_LEN + 4 {
            return Err(DlmsError::FrameInvalid(format!(
                "frame of {} bytes is too short",
                body.len()
            )));
        }

        let hcs = u16::from_le_bytes([body[HEADER_LEN], body[HEADER_LEN + 1]]);
        if hcs != crc16(&body[..HEADER_LEN]) {
            return Err(DlmsError::FrameInvalid("HCS mismatch".into()));
        }
        let fcs_at = body.len() - 2;
        let fcs = u16::from_le_bytes([body[fcs_at], body[fcs_at + 1]]);
        let mut calc = FcsCalc::new();
        calc.update_bytes(&body[..fcs_at]);
        if fcs != calc.value() {
            return Err(DlmsError::FrameInvalid("FCS mismatch".into()));
        }

        let format = FrameFormat::from_byte(body[0])?;
        let control = body[5];
        let frame_type = FrameType::from_control_byte(control)?;
        if frame_type.format() != format {
            return Err(DlmsError::FrameInvalid(format!(
                "{} frame carried in format {:?}",
                frame_type, format
            )));
        }

        let (send_seq, recv_seq) = match format {
            FrameFormat::Type1 => ((control >> 1) & 0x07, (control >> 5) & 0x07),
            FrameFormat::Type2 => (0, (control >> 5) & 0x07),
            FrameFormat::Type3 => (0, 0),
        };

        Ok(Self {
            frame_type,
            destination: HdlcAddress::from_bytes([body[1], body[2]]),
            source: HdlcAddress::from_bytes([body[3], body[4]]),
            send_seq,
            recv_seq,
            poll_final: control & POLL_FINAL != 0,
            payload: Bytes::copy_from_slice(&body[HEADER_LEN + 2..fcs_at]),
        })
    }
}

fn unescape(escaped: &[u8]) -> DlmsResult<Vec<u8>> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut pending_escape = false;
    for &byte in escaped {
        if pending_escape {
            out.push(byte ^ ESCAPE_MASK);
            pending_escape = false;
        } else if byte == ESCAPE {
            pending_escape = true;
        } else {
            out.push(byte);
        }
    }
    if pending_escape {
        return Err(DlmsError::FrameInvalid("incomplete escape sequence".into()));
    }
    Ok(out)
}

impl fmt::Display for HdlcFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format() {
            FrameFormat::Type1 => write!(
                f,
                "I(ns={}, nr={}) {} -> {} [{} bytes]",
                self.send_seq,
                self.recv_seq,
                self.source,
                self.destination,
                self.payload.len()
            ),
            FrameFormat::Type2 => write!(
                f,
                "{}(nr={}) {} -> {}",
                self.frame_type, self.recv_seq, self.source, self.destination
            ),
            FrameFormat::Type3 => write!(f, "{} {} -> {}", self.frame_type, self.source, self.destination),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: HdlcAddress = HdlcAddress::new(0x00, 0x10);
    const SERVER: HdlcAddress = HdlcAddress::new(0x01, 0x11);

    #[test]
    fn test_control_bytes() {
        let i = HdlcFrame::information(SERVER, CLIENT, 3, 5, Bytes::new());
        assert_eq!(i.control_byte(), (3 << 1) | (5 << 5) | POLL_FINAL);

        let rr = HdlcFrame::supervisory(FrameType::ReceiveReady, SERVER, CLIENT, 2);
        assert_eq!(rr.control_byte(), 0x01 | (2 << 5) | POLL_FINAL);

        let snrm = HdlcFrame::unnumbered(FrameType::SetNormalResponseMode, SERVER, CLIENT);
        assert_eq!(snrm.control_byte(), 0x93);
        assert_eq!(snrm.format(), FrameFormat::Type3);
    }

    #[test]
    fn test_frame_type_from_control_byte() {
        assert_eq!(FrameType::from_control_byte(0x73).unwrap(), FrameType::UnnumberedAcknowledge);
        assert_eq!(FrameType::from_control_byte(0x1F).unwrap(), FrameType::DisconnectMode);
        assert_eq!(FrameType::from_control_byte(0xA9).unwrap(), FrameType::Reject);
        assert_eq!(FrameType::from_control_byte(0x32).unwrap(), FrameType::Information);
        assert!(FrameType::from_control_byte(0x0D).is_err());
    }

    #[test]
    fn test_information_frame_survives_escaping() {
        let payload = Bytes::from_static(&[0xC0, 0x01, FLAG, 0x00, ESCAPE, 0x7E, 0x02]);
        let frame = HdlcFrame::information(SERVER, CLIENT, 6, 7, payload);
        let wire = frame.encode();

        assert_eq!(wire[0], FLAG);
        assert_eq!(wire[wire.len() - 1], FLAG);
        assert!(!wire[1..wire.len() - 1].contains(&FLAG));
        assert_eq!(HdlcFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn test_decode_supervisory_frame() {
        let frame = HdlcFrame::supervisory(FrameType::ReceiveNotReady, CLIENT, SERVER, 4);
        let decoded = HdlcFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.frame_type, FrameType::ReceiveNotReady);
        assert_eq!(decoded.recv_seq, 4);
        assert_eq!(decoded.source, SERVER);
        assert_eq!(decoded.destination, CLIENT);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let frame = HdlcFrame::information(SERVER, CLIENT, 0, 0, Bytes::from_static(b"abc"));
        let mut wire = frame.encode().to_vec();
        let len = wire.len();
        wire[len - 4] ^= 0x01;
        assert!(matches!(HdlcFrame::decode(&wire), Err(DlmsError::FrameInvalid(_))));

        let mut wire = frame.encode().to_vec();
        wire[2] ^= 0x01;
        assert!(matches!(HdlcFrame::decode(&wire), Err(DlmsError::FrameInvalid(_))));

        assert!(HdlcFrame::decode(&[FLAG, 0xA0, 0x00, FLAG]).is_err());
        assert!(HdlcFrame::decode(&[0xA0, 0x00]).is_err());
    }

    #[test]
    fn test_next_sequence_wraps() {
        assert_eq!(next_sequence(6), 7);
        assert_eq!(next_sequence(7), 0);
    }
}
