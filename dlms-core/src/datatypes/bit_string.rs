//! Bit string values

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Arbitrary string of bits, most significant bit first. May be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitString {
    bytes: Vec<u8>,
    num_bits: usize,
}

impl BitString {
    /// Construct a bit string from packed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::InvalidData`] if `num_bits` does not fit in `bytes`.
    pub fn new(bytes: Vec<u8>, num_bits: usize) -> DlmsResult<Self> {
        if num_bits > bytes.len() * 8 {
            return Err(DlmsError::InvalidData(format!(
                "{} bytes cannot hold {} bits",
                bytes.len(),
                num_bits
            )));
        }
        Ok(Self { bytes, num_bits })
    }

    /// Parse a textual bit string such as `"0110"`.
    ///
    /// Only the characters `0` and `1` are accepted and at least one is required.
    pub fn from_bits_str(bits: &str) -> DlmsResult<Self> {
        if bits.is_empty() || !bits.chars().all(|c| c == '0' || c == '1') {
            return Err(DlmsError::TypeMismatch(format!(
                "'{}' is not a bit string",
                bits
            )));
        }
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (index, c) in bits.chars().enumerate() {
            if c == '1' {
                bytes[index / 8] |= 0x80 >> (index % 8);
            }
        }
        Ok(Self {
            bytes,
            num_bits: bits.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Get the bit at `index` (0-based, MSB first)
    pub fn get_bit(&self, index: usize) -> DlmsResult<bool> {
        if index >= self.num_bits {
            return Err(DlmsError::InvalidData(format!(
                "Bit index {} out of bounds (num_bits: {})",
                index, self.num_bits
            )));
        }
        Ok(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    /// Set the bit at `index` (0-based, MSB first)
    pub fn set_bit(&mut self, index: usize, value: bool) -> DlmsResult<()> {
        if index >= self.num_bits {
            return Err(DlmsError::InvalidData(format!(
                "Bit index {} out of bounds (num_bits: {})",
                index, self.num_bits
            )));
        }
        let mask = 0x80 >> (index % 8);
        if value {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
        Ok(())
    }
}

impl FromStr for BitString {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bits_str(s)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for index in 0..self.num_bits {
            let set = self.bytes[index / 8] & (0x80 >> (index % 8)) != 0;
            f.write_str(if set { "1" } else { "0" })?;
        }
        Ok(())
    }
}
