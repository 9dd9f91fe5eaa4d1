//! Frame Check Sequence (FCS) calculation for HDLC
//!
//! CRC-16/X.25: reflected polynomial 0x8408, initial value 0xFFFF and a final
//! inversion. The value travels least significant byte first.

const INITIAL_FCS: u16 = 0xFFFF;
const KEY: u16 = 0x8408;

const FCS_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut b = 0;
    while b < 256 {
        let mut v = b as u16;
        let mut bit = 0;
        while bit < 8 {
            v = if v & 1 == 1 { (v >> 1) ^ KEY } else { v >> 1 };
            bit += 1;
        }
        table[b] = v;
        b += 1;
    }
    table
}

/// Incremental FCS calculator
#[derive(Debug, Clone, Copy)]
pub struct FcsCalc {
    fcs_value: u16,
}

impl FcsCalc {
    pub fn new() -> Self {
        Self {
            fcs_value: INITIAL_FCS,
        }
    }

    pub fn update(&mut self, data: u8) {
        self.fcs_value =
            (self.fcs_value >> 8) ^ FCS_TABLE[((self.fcs_value ^ u16::from(data)) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Final checksum after inversion
    pub fn value(&self) -> u16 {
        self.fcs_value ^ 0xFFFF
    }

    /// Final checksum in wire order
    pub fn fcs_value_bytes(&self) -> [u8; 2] {
        self.value().to_le_bytes()
    }
}

impl Default for FcsCalc {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-16/X.25 of `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut calc = FcsCalc::new();
    calc.update_bytes(data);
    calc.value()
}
