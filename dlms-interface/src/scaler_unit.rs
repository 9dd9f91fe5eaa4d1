//! Scaler Unit for Register interface classes
//!
//! Register values are transported unscaled; the physical value is
//! `value * 10^scaler` in the unit named by the unit code.
//!
//! # Structure
//!
//! On the wire a scaler-unit is `structure { integer scaler, enum unit }`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::{ScalerUnit, units};
//!
//! // Voltage in 0.1 V steps
//! let scaler_unit = ScalerUnit::new(-1, units::VOLT);
//! assert_eq!(scaler_unit.scale_value(2301.0), 230.1);
//! ```

use dlms_core::{DataObject, DlmsError, DlmsResult};

/// Unit codes of the DLMS Blue Book (subset used by the simulator)
pub mod units {
    pub const NONE: u8 = 255;
    pub const SECOND: u8 = 7;
    pub const WATT: u8 = 27;
    pub const VOLT_AMPERE: u8 = 28;
    pub const VAR: u8 = 29;
    pub const WATT_HOUR: u8 = 30;
    pub const VOLT_AMPERE_HOUR: u8 = 31;
    pub const VAR_HOUR: u8 = 32;
    pub const AMPERE: u8 = 33;
    pub const VOLT: u8 = 35;
    pub const HERTZ: u8 = 44;
    /// Signal strength
    pub const DBM: u8 = 70;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScalerUnit {
    /// Power of ten applied to the raw value
    pub scaler: i8,
    pub unit: u8,
}

impl ScalerUnit {
    pub fn new(scaler: i8, unit: u8) -> Self {
        Self { scaler, unit }
    }

    /// No scaling and no unit
    pub fn none() -> Self {
        Self {
            scaler: 0,
            unit: units::NONE,
        }
    }

    /// `value * 10^scaler`
    pub fn scale_value(&self, value: f64) -> f64 {
        value * 10_f64.powi(i32::from(self.scaler))
    }

    /// `scaled_value / 10^scaler`
    pub fn unscale_value(&self, scaled_value: f64) -> f64 {
        scaled_value / 10_f64.powi(i32::from(self.scaler))
    }

    pub fn to_data_object(&self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::Integer8(self.scaler),
            DataObject::Enumerate(self.unit),
        ])
    }

    pub fn from_data_object(value: &DataObject) -> DlmsResult<Self> {
        let fields = value.as_structure_of(2)?;
        let scaler = i8::try_from(fields[0].as_i64()?)
            .map_err(|_| DlmsError::RangeViolation(format!("scaler {} out of range", fields[0])))?;
        let unit = u8::try_from(fields[1].as_i64()?)
            .map_err(|_| DlmsError::RangeViolation(format!("unit {} out of range", fields[1])))?;
        Ok(Self { scaler, unit })
    }
}

impl Default for ScalerUnit {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_value() {
        let kilo_watt_hour = ScalerUnit::new(3, units::WATT_HOUR);
        assert_eq!(kilo_watt_hour.scale_value(12.5), 12500.0);
        assert_eq!(kilo_watt_hour.unscale_value(12500.0), 12.5);

        let centi_ampere = ScalerUnit::new(-2, units::AMPERE);
        assert!((centi_ampere.scale_value(523.0) - 5.23).abs() < 1e-9);
    }

    #[test]
    fn test_scaler_unit_data_object() {
        let scaler_unit = ScalerUnit::new(-1, units::VOLT);
        let value = scaler_unit.to_data_object();
        assert_eq!(
            value,
            DataObject::Structure(vec![DataObject::Integer8(-1), DataObject::Enumerate(35)])
        );
        assert_eq!(ScalerUnit::from_data_object(&value).unwrap(), scaler_unit);
    }

    #[test]
    fn test_scaler_unit_rejects_malformed_structure() {
        assert!(ScalerUnit::from_data_object(&DataObject::Integer8(1)).is_err());
        assert!(
            ScalerUnit::from_data_object(&DataObject::Structure(vec![
                DataObject::Integer16(300),
                DataObject::Enumerate(27),
            ]))
            .is_err()
        );
    }
}
