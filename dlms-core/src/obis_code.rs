use crate::error::{DlmsError, DlmsResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Byte value that acts as a wildcard in a pattern position
pub const WILDCARD: u8 = 255;

static REDUCED_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})-(\d{1,3}):(\d{1,3})\.(\d{1,3})\.(\d{1,3})(?:\*(\d{1,3}))?$")
        .expect("reduced OBIS pattern is valid")
});

/// OBIS (Object Identification System) code for identifying COSEM objects
///
/// OBIS codes are 6-byte identifiers used in DLMS/COSEM to uniquely identify
/// objects in a logical device. Codes are immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    /// Pattern matching every code
    pub const ANY: ObisCode = ObisCode {
        bytes: [WILDCARD; 6],
    };

    /// Create a new OBIS code from individual bytes
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Build an OBIS code from its binary form
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::InvalidObisCode`] unless `bytes` holds exactly 6 bytes.
    pub fn from_bytes(bytes: &[u8]) -> DlmsResult<Self> {
        let bytes: [u8; 6] = bytes.try_into().map_err(|_| {
            DlmsError::InvalidObisCode(format!("expected 6 bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Parse an OBIS code from string format
    ///
    /// Supports formats like:
    /// - "1.0.1.8.0.255"
    /// - "1-0:1.8.0*255" (the `*F` group is optional and defaults to 255)
    pub fn parse(s: &str) -> DlmsResult<Self> {
        let s = s.trim();
        if s.contains(':') {
            Self::parse_reduced_format(s)
        } else {
            Self::parse_dot_format(s)
        }
    }

    fn parse_dot_format(s: &str) -> DlmsResult<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 6 {
            return Err(DlmsError::InvalidObisCode(format!(
                "expected 6 dot-separated values in '{}'",
                s
            )));
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(&parts) {
            *slot = parse_octet(part)?;
        }
        Ok(Self { bytes })
    }

    fn parse_reduced_format(s: &str) -> DlmsResult<Self> {
        let captures = REDUCED_FORMAT
            .captures(s)
            .ok_or_else(|| DlmsError::InvalidObisCode(format!("unrecognised format '{}'", s)))?;

        let mut bytes = [WILDCARD; 6];
        for (i, slot) in bytes.iter_mut().enumerate() {
            if let Some(group) = captures.get(i + 1) {
                *slot = parse_octet(group.as_str())?;
            }
        }
        Ok(Self { bytes })
    }

    /// Get the OBIS code as a byte array
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    /// Get the OBIS code as a copied byte array
    pub fn to_bytes(&self) -> [u8; 6] {
        self.bytes
    }

    /// Returns true iff every non-wildcard byte of `pattern` equals the
    /// corresponding byte of `self`.
    ///
    /// The relation is asymmetric: wildcards are only honoured in `pattern`.
    pub fn matches(&self, pattern: &ObisCode) -> bool {
        self.bytes
            .iter()
            .zip(pattern.bytes.iter())
            .all(|(own, pat)| *pat == WILDCARD || own == pat)
    }

    pub fn a(&self) -> u8 {
        self.bytes[0]
    }

    pub fn b(&self) -> u8 {
        self.bytes[1]
    }

    pub fn c(&self) -> u8 {
        self.bytes[2]
    }

    pub fn d(&self) -> u8 {
        self.bytes[3]
    }

    pub fn e(&self) -> u8 {
        self.bytes[4]
    }

    pub fn f(&self) -> u8 {
        self.bytes[5]
    }
}

fn parse_octet(part: &str) -> DlmsResult<u8> {
    let value: u32 = part
        .trim()
        .parse()
        .map_err(|_| DlmsError::InvalidObisCode(format!("invalid byte value '{}'", part)))?;
    u8::try_from(value)
        .map_err(|_| DlmsError::InvalidObisCode(format!("byte value {} outside [0,255]", value)))
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{}",
            self.bytes[0], self.bytes[1], self.bytes[2],
            self.bytes[3], self.bytes[4], self.bytes[5]
        )
    }
}

impl FromStr for ObisCode {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&[u8]> for ObisCode {
    type Error = DlmsError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl From<[u8; 6]> for ObisCode {
    fn from(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obis_code_new() {
        let code = ObisCode::new(1, 0, 1, 8, 0, 255);
        assert_eq!(code.a(), 1);
        assert_eq!(code.c(), 1);
        assert_eq!(code.f(), 255);
    }

    #[test]
    fn test_obis_code_parse() {
        let code = ObisCode::parse("1.0.1.8.0.255").unwrap();
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));
        let code: ObisCode = " 0.0.1.0.0.255 ".parse().unwrap();
        assert_eq!(code, ObisCode::new(0, 0, 1, 0, 0, 255));
    }

    #[test]
    fn test_obis_code_parse_reduced_format() {
        assert_eq!(
            ObisCode::parse("1-0:1.8.0*255").unwrap(),
            ObisCode::new(1, 0, 1, 8, 0, 255)
        );
        assert_eq!(
            ObisCode::parse("1-0:99.1.0").unwrap(),
            ObisCode::new(1, 0, 99, 1, 0, 255)
        );
    }

    #[test]
    fn test_obis_code_parse_rejects_bad_input() {
        for input in ["1.0.1.8.0", "1.0.1.8.0.255.1", "1.0.256.8.0.255", "a.b.c.d.e.f", ""] {
            assert!(
                matches!(ObisCode::parse(input), Err(DlmsError::InvalidObisCode(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_obis_code_from_bytes() {
        let code = ObisCode::from_bytes(&[1, 0, 99, 1, 0, 255]).unwrap();
        assert_eq!(code.to_bytes(), [1, 0, 99, 1, 0, 255]);
        assert!(ObisCode::from_bytes(&[1, 0, 99, 1, 0]).is_err());
        assert!(ObisCode::try_from(&[0u8; 7][..]).is_err());
    }

    #[test]
    fn test_obis_code_text_and_binary_round_trip() {
        for bytes in [[0u8; 6], [1, 0, 1, 8, 0, 255], [255; 6], [7, 13, 42, 128, 200, 3]] {
            let code = ObisCode::from(bytes);
            assert_eq!(ObisCode::parse(&code.to_string()).unwrap(), code);
            assert_eq!(ObisCode::from_bytes(&code.to_bytes()).unwrap(), code);
        }
    }

    #[test]
    fn test_obis_code_matches() {
        let energy = ObisCode::new(1, 0, 1, 8, 0, 255);
        assert!(energy.matches(&energy));
        assert!(energy.matches(&ObisCode::ANY));
        assert!(energy.matches(&ObisCode::new(1, 0, 1, 8, 255, 255)));
        assert!(!energy.matches(&ObisCode::new(1, 0, 2, 8, 255, 255)));

        // wildcards only count on the pattern side
        let tariff = ObisCode::new(1, 0, 1, 8, 1, 255);
        let pattern = ObisCode::new(1, 0, 1, 8, 255, 255);
        assert!(tariff.matches(&pattern));
        assert!(!pattern.matches(&tariff));
    }

    #[test]
    fn test_obis_code_display() {
        let code = ObisCode::new(1, 0, 1, 8, 0, 255);
        assert_eq!(format!("{}", code), "1.0.1.8.0.255");
    }
}
