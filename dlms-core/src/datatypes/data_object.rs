//! Attribute values for COSEM objects

use crate::datatypes::bit_string::BitString;
use crate::error::{DlmsError, DlmsResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value held by a COSEM attribute or passed to a method
///
/// Every attribute value in the simulator is one of these variants; class code
/// matches on them exhaustively instead of inspecting values at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataObject {
    /// Null data
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer 8-bit
    Integer8(i8),
    /// Integer 16-bit
    Integer16(i16),
    /// Integer 32-bit
    Integer32(i32),
    /// Integer 64-bit
    Integer64(i64),
    /// Unsigned integer 8-bit
    Unsigned8(u8),
    /// Unsigned integer 16-bit
    Unsigned16(u16),
    /// Unsigned integer 32-bit
    Unsigned32(u32),
    /// Unsigned integer 64-bit
    Unsigned64(u64),
    /// Float 32-bit
    Float32(f32),
    /// Float 64-bit
    Float64(f64),
    /// Enumeration (8-bit)
    Enumerate(u8),
    /// BCD digit pair, 0..=99
    Bcd(u8),
    /// Octet string
    OctetString(Vec<u8>),
    /// Visible (ASCII) string
    VisibleString(String),
    /// UTF-8 string
    Utf8String(String),
    /// Bit string
    BitString(BitString),
    /// Array of DataObjects
    Array(Vec<DataObject>),
    /// Structure (ordered list of DataObjects)
    Structure(Vec<DataObject>),
    /// Date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date and time
    DateTime(NaiveDateTime),
}

/// Type tag for [`DataObject`], numbered after the DLMS data type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataObjectType {
    NullData = 0,
    Array = 1,
    Structure = 2,
    Boolean = 3,
    BitString = 4,
    DoubleLong = 5,
    DoubleLongUnsigned = 6,
    OctetString = 9,
    VisibleString = 10,
    Utf8String = 12,
    Bcd = 13,
    Integer = 15,
    LongInteger = 16,
    Unsigned = 17,
    LongUnsigned = 18,
    Long64 = 20,
    Long64Unsigned = 21,
    Enumerate = 22,
    Float32 = 23,
    Float64 = 24,
    DateTime = 25,
    Date = 26,
    Time = 27,
}

impl DataObjectType {
    /// DLMS type code
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Check if the type is one of the integer widths
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataObjectType::Integer
                | DataObjectType::LongInteger
                | DataObjectType::DoubleLong
                | DataObjectType::Long64
                | DataObjectType::Unsigned
                | DataObjectType::LongUnsigned
                | DataObjectType::DoubleLongUnsigned
                | DataObjectType::Long64Unsigned
        )
    }

    /// Check if the type is numeric (integers and floats)
    pub fn is_number(self) -> bool {
        self.is_integer() || matches!(self, DataObjectType::Float32 | DataObjectType::Float64)
    }
}

impl fmt::Display for DataObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataObjectType::NullData => "null-data",
            DataObjectType::Array => "array",
            DataObjectType::Structure => "structure",
            DataObjectType::Boolean => "boolean",
            DataObjectType::BitString => "bit-string",
            DataObjectType::DoubleLong => "double-long",
            DataObjectType::DoubleLongUnsigned => "double-long-unsigned",
            DataObjectType::OctetString => "octet-string",
            DataObjectType::VisibleString => "visible-string",
            DataObjectType::Utf8String => "utf8-string",
            DataObjectType::Bcd => "bcd",
            DataObjectType::Integer => "integer",
            DataObjectType::LongInteger => "long",
            DataObjectType::Unsigned => "unsigned",
            DataObjectType::LongUnsigned => "long-unsigned",
            DataObjectType::Long64 => "long64",
            DataObjectType::Long64Unsigned => "long64-unsigned",
            DataObjectType::Enumerate => "enum",
            DataObjectType::Float32 => "float32",
            DataObjectType::Float64 => "float64",
            DataObjectType::DateTime => "date-time",
            DataObjectType::Date => "date",
            DataObjectType::Time => "time",
        };
        f.write_str(name)
    }
}

impl DataObject {
    /// Get the type tag of this value
    pub fn get_type(&self) -> DataObjectType {
        match self {
            DataObject::Null => DataObjectType::NullData,
            DataObject::Boolean(_) => DataObjectType::Boolean,
            DataObject::Integer8(_) => DataObjectType::Integer,
            DataObject::Integer16(_) => DataObjectType::LongInteger,
            DataObject::Integer32(_) => DataObjectType::DoubleLong,
            DataObject::Integer64(_) => DataObjectType::Long64,
            DataObject::Unsigned8(_) => DataObjectType::Unsigned,
            DataObject::Unsigned16(_) => DataObjectType::LongUnsigned,
            DataObject::Unsigned32(_) => DataObjectType::DoubleLongUnsigned,
            DataObject::Unsigned64(_) => DataObjectType::Long64Unsigned,
            DataObject::Float32(_) => DataObjectType::Float32,
            DataObject::Float64(_) => DataObjectType::Float64,
            DataObject::Enumerate(_) => DataObjectType::Enumerate,
            DataObject::Bcd(_) => DataObjectType::Bcd,
            DataObject::OctetString(_) => DataObjectType::OctetString,
            DataObject::VisibleString(_) => DataObjectType::VisibleString,
            DataObject::Utf8String(_) => DataObjectType::Utf8String,
            DataObject::BitString(_) => DataObjectType::BitString,
            DataObject::Array(_) => DataObjectType::Array,
            DataObject::Structure(_) => DataObjectType::Structure,
            DataObject::Date(_) => DataObjectType::Date,
            DataObject::Time(_) => DataObjectType::Time,
            DataObject::DateTime(_) => DataObjectType::DateTime,
        }
    }

    /// Integer value of any integer variant
    fn integer_value(&self) -> Option<i128> {
        match *self {
            DataObject::Integer8(v) => Some(v.into()),
            DataObject::Integer16(v) => Some(v.into()),
            DataObject::Integer32(v) => Some(v.into()),
            DataObject::Integer64(v) => Some(v.into()),
            DataObject::Unsigned8(v) => Some(v.into()),
            DataObject::Unsigned16(v) => Some(v.into()),
            DataObject::Unsigned32(v) => Some(v.into()),
            DataObject::Unsigned64(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Convert this value to `target`, checking the exact range of the target width.
    ///
    /// Integers convert between widths when the value fits, integers and
    /// floats widen to floats, and ASCII text may move between the two string
    /// kinds. Everything else must already carry the target type.
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::TypeMismatch`] if the value cannot be represented.
    pub fn coerce_to(&self, target: DataObjectType) -> DlmsResult<DataObject> {
        let mismatch = || {
            DlmsError::TypeMismatch(format!("{} is not a valid {} value", self, target))
        };

        if target.is_integer() {
            let value = self.integer_value().ok_or_else(mismatch)?;
            let coerced = match target {
                DataObjectType::Integer => i8::try_from(value).map(DataObject::Integer8).ok(),
                DataObjectType::LongInteger => i16::try_from(value).map(DataObject::Integer16).ok(),
                DataObjectType::DoubleLong => i32::try_from(value).map(DataObject::Integer32).ok(),
                DataObjectType::Long64 => i64::try_from(value).map(DataObject::Integer64).ok(),
                DataObjectType::Unsigned => u8::try_from(value).map(DataObject::Unsigned8).ok(),
                DataObjectType::LongUnsigned => u16::try_from(value).map(DataObject::Unsigned16).ok(),
                DataObjectType::DoubleLongUnsigned => {
                    u32::try_from(value).map(DataObject::Unsigned32).ok()
                }
                DataObjectType::Long64Unsigned => u64::try_from(value).map(DataObject::Unsigned64).ok(),
                _ => None,
            };
            return coerced.ok_or_else(mismatch);
        }

        match (target, self) {
            (DataObjectType::Float64, DataObject::Float64(v)) => Ok(DataObject::Float64(*v)),
            (DataObjectType::Float64, DataObject::Float32(v)) => Ok(DataObject::Float64((*v).into())),
            (DataObjectType::Float32, DataObject::Float32(v)) => Ok(DataObject::Float32(*v)),
            (DataObjectType::Float32, DataObject::Float64(v))
                if !v.is_finite() || v.abs() <= f64::from(f32::MAX) =>
            {
                Ok(DataObject::Float32(*v as f32))
            }
            (DataObjectType::Float32 | DataObjectType::Float64, other) => {
                let value = other.integer_value().ok_or_else(mismatch)?;
                if target == DataObjectType::Float32 {
                    Ok(DataObject::Float32(value as f32))
                } else {
                    Ok(DataObject::Float64(value as f64))
                }
            }
            (DataObjectType::Enumerate, DataObject::Enumerate(v)) => Ok(DataObject::Enumerate(*v)),
            (DataObjectType::Enumerate, other) => other
                .integer_value()
                .and_then(|v| u8::try_from(v).ok())
                .map(DataObject::Enumerate)
                .ok_or_else(mismatch),
            (DataObjectType::Bcd, other) => {
                let value = match other {
                    DataObject::Bcd(v) => Some(i128::from(*v)),
                    _ => other.integer_value(),
                };
                value
                    .filter(|v| (0..=99).contains(v))
                    .map(|v| DataObject::Bcd(v as u8))
                    .ok_or_else(mismatch)
            }
            (DataObjectType::VisibleString, DataObject::VisibleString(s) | DataObject::Utf8String(s))
                if s.is_ascii() =>
            {
                Ok(DataObject::VisibleString(s.clone()))
            }
            (DataObjectType::Utf8String, DataObject::VisibleString(s) | DataObject::Utf8String(s)) => {
                Ok(DataObject::Utf8String(s.clone()))
            }
            (target, value) if value.get_type() == target => Ok(value.clone()),
            _ => Err(mismatch()),
        }
    }

    /// Get the value as a boolean
    pub fn as_bool(&self) -> DlmsResult<bool> {
        match self {
            DataObject::Boolean(b) => Ok(*b),
            _ => Err(self.unexpected("boolean")),
        }
    }

    /// Get any integer, enum or BCD value widened to `i64`
    pub fn as_i64(&self) -> DlmsResult<i64> {
        match self {
            DataObject::Enumerate(v) | DataObject::Bcd(v) => Ok(i64::from(*v)),
            _ => self
                .integer_value()
                .and_then(|v| i64::try_from(v).ok())
                .ok_or_else(|| self.unexpected("integer")),
        }
    }

    /// Get any numeric value as `f64`
    pub fn as_f64(&self) -> DlmsResult<f64> {
        match self {
            DataObject::Float32(v) => Ok(f64::from(*v)),
            DataObject::Float64(v) => Ok(*v),
            _ => self
                .integer_value()
                .map(|v| v as f64)
                .ok_or_else(|| self.unexpected("number")),
        }
    }

    /// Get the value as an octet string
    pub fn as_octet_string(&self) -> DlmsResult<&[u8]> {
        match self {
            DataObject::OctetString(s) => Ok(s),
            _ => Err(self.unexpected("octet-string")),
        }
    }

    /// Get the value of either string kind
    pub fn as_str(&self) -> DlmsResult<&str> {
        match self {
            DataObject::VisibleString(s) | DataObject::Utf8String(s) => Ok(s),
            _ => Err(self.unexpected("string")),
        }
    }

    pub fn as_date_time(&self) -> DlmsResult<NaiveDateTime> {
        match self {
            DataObject::DateTime(dt) => Ok(*dt),
            _ => Err(self.unexpected("date-time")),
        }
    }

    pub fn as_time(&self) -> DlmsResult<NaiveTime> {
        match self {
            DataObject::Time(t) => Ok(*t),
            DataObject::DateTime(dt) => Ok(dt.time()),
            _ => Err(self.unexpected("time")),
        }
    }

    /// Get the value as an array
    pub fn as_array(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Array(a) => Ok(a),
            _ => Err(self.unexpected("array")),
        }
    }

    /// Get the value as a structure
    pub fn as_structure(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Structure(s) => Ok(s),
            _ => Err(self.unexpected("structure")),
        }
    }

    /// Get a structure and check that it holds exactly `len` fields
    pub fn as_structure_of(&self, len: usize) -> DlmsResult<&[DataObject]> {
        let fields = self.as_structure()?;
        if fields.len() != len {
            return Err(DlmsError::TypeMismatch(format!(
                "expected structure of {} fields, got {}",
                len,
                fields.len()
            )));
        }
        Ok(fields)
    }

    fn unexpected(&self, expected: &str) -> DlmsError {
        DlmsError::TypeMismatch(format!("expected {}, got {}", expected, self.get_type()))
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::Null => write!(f, "NULL_DATA"),
            DataObject::Boolean(b) => write!(f, "BOOLEAN: {}", b),
            DataObject::Integer8(i) => write!(f, "INTEGER: {}", i),
            DataObject::Integer16(i) => write!(f, "LONG_INTEGER: {}", i),
            DataObject::Integer32(i) => write!(f, "DOUBLE_LONG: {}", i),
            DataObject::Integer64(i) => write!(f, "LONG64: {}", i),
            DataObject::Unsigned8(u) => write!(f, "UNSIGNED: {}", u),
            DataObject::Unsigned16(u) => write!(f, "LONG_UNSIGNED: {}", u),
            DataObject::Unsigned32(u) => write!(f, "DOUBLE_LONG_UNSIGNED: {}", u),
            DataObject::Unsigned64(u) => write!(f, "LONG64_UNSIGNED: {}", u),
            DataObject::Float32(fl) => write!(f, "FLOAT32: {}", fl),
            DataObject::Float64(fl) => write!(f, "FLOAT64: {}", fl),
            DataObject::Enumerate(e) => write!(f, "ENUMERATE: {}", e),
            DataObject::Bcd(b) => write!(f, "BCD: {}", b),
            DataObject::OctetString(s) => {
                write!(f, "OCTET_STRING:")?;
                for byte in s {
                    write!(f, " {:02X}", byte)?;
                }
                Ok(())
            }
            DataObject::VisibleString(s) => write!(f, "VISIBLE_STRING: {}", s),
            DataObject::Utf8String(s) => write!(f, "UTF8_STRING: {}", s),
            DataObject::BitString(bs) => write!(f, "BIT_STRING: {}", bs),
            DataObject::Array(arr) => write!(f, "ARRAY: {} element(s)", arr.len()),
            DataObject::Structure(s) => write!(f, "STRUCTURE: {} element(s)", s.len()),
            DataObject::Date(d) => write!(f, "DATE: {}", d),
            DataObject::Time(t) => write!(f, "TIME: {}", t),
            DataObject::DateTime(dt) => write!(f, "DATE_TIME: {}", dt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_object_type_tags() {
        assert_eq!(DataObject::Null.get_type(), DataObjectType::NullData);
        assert_eq!(DataObject::Integer16(5).get_type().tag(), 16);
        assert_eq!(DataObject::Unsigned32(5).get_type().tag(), 6);
        assert!(DataObjectType::Long64Unsigned.is_integer());
        assert!(DataObjectType::Float32.is_number());
        assert!(!DataObjectType::Enumerate.is_integer());
    }

    #[test]
    fn test_coerce_integer_width_bounds() {
        assert_eq!(
            DataObject::Integer32(-32768).coerce_to(DataObjectType::LongInteger).unwrap(),
            DataObject::Integer16(-32768)
        );
        assert_eq!(
            DataObject::Unsigned8(200).coerce_to(DataObjectType::LongInteger).unwrap(),
            DataObject::Integer16(200)
        );
        assert!(matches!(
            DataObject::Integer32(32768).coerce_to(DataObjectType::LongInteger),
            Err(DlmsError::TypeMismatch(_))
        ));
        assert!(DataObject::Integer8(-1).coerce_to(DataObjectType::Unsigned).is_err());
        assert!(DataObject::Unsigned64(u64::MAX).coerce_to(DataObjectType::Long64).is_err());
    }

    #[test]
    fn test_coerce_bcd_and_enum() {
        assert_eq!(
            DataObject::Unsigned8(99).coerce_to(DataObjectType::Bcd).unwrap(),
            DataObject::Bcd(99)
        );
        assert!(DataObject::Unsigned8(100).coerce_to(DataObjectType::Bcd).is_err());
        assert!(DataObject::Bcd(120).coerce_to(DataObjectType::Bcd).is_err());
        assert_eq!(
            DataObject::Unsigned16(3).coerce_to(DataObjectType::Enumerate).unwrap(),
            DataObject::Enumerate(3)
        );
    }

    #[test]
    fn test_coerce_rejects_cross_kind_values() {
        assert!(DataObject::Boolean(true).coerce_to(DataObjectType::Unsigned).is_err());
        assert!(DataObject::Integer8(1).coerce_to(DataObjectType::Boolean).is_err());
        assert!(
            DataObject::Utf8String("zähler".into())
                .coerce_to(DataObjectType::VisibleString)
                .is_err()
        );
        assert!(
            DataObject::OctetString(vec![1])
                .coerce_to(DataObjectType::Structure)
                .is_err()
        );
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(DataObject::Unsigned16(230).as_i64().unwrap(), 230);
        assert_eq!(DataObject::Float32(1.5).as_f64().unwrap(), 1.5);
        assert_eq!(DataObject::Integer8(-4).as_f64().unwrap(), -4.0);
        assert!(DataObject::OctetString(vec![]).as_i64().is_err());
    }

    #[test]
    fn test_structure_arity() {
        let value = DataObject::Structure(vec![DataObject::Unsigned8(1), DataObject::Null]);
        assert_eq!(value.as_structure_of(2).unwrap().len(), 2);
        assert!(value.as_structure_of(3).is_err());
    }
}
