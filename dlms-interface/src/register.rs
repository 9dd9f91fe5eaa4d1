//! Register interface class (Class ID: 3)
//!
//! The Register interface class represents a single register value with
//! scaling factor and unit information.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: value - The unscaled register value (numeric)
//! - Attribute 3: scaler_unit - ScalerUnit structure (scaler and unit)
//! - Attribute 4: status - Status value (Unsigned8)
//!
//! # Methods
//!
//! - Method 1: reset - Zero the value and the status
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::{Register, ScalerUnit, units};
//! use dlms_core::{DataObjectType, ObisCode};
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! // Active energy import in Wh
//! let obis = ObisCode::new(1, 0, 1, 8, 0, 255);
//! let register = Register::new(obis, DataObjectType::DoubleLongUnsigned, ScalerUnit::new(0, units::WATT_HOUR))?;
//! register.set_reading(12345.0).await?;
//! assert_eq!(register.scaled_value().await?, 12345.0);
//! # Ok(())
//! # }
//! ```

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use crate::scaler_unit::ScalerUnit;
use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
struct RegisterState {
    value: DataObject,
    scaler_unit: ScalerUnit,
    status: u8,
}

/// Register interface class (Class ID: 3)
#[derive(Debug)]
pub struct Register {
    schema: ObjectSchema,
    value_type: DataObjectType,
    state: RwLock<RegisterState>,
}

impl Register {
    pub const CLASS_ID: u16 = 3;

    /// Attribute IDs
    pub const ATTR_VALUE: u8 = 2;
    pub const ATTR_SCALER_UNIT: u8 = 3;
    pub const ATTR_STATUS: u8 = 4;

    /// Method IDs
    pub const METHOD_RESET: u8 = 1;

    /// Create a register holding zero
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::TypeMismatch`] if `value_type` is not numeric.
    pub fn new(
        logical_name: ObisCode,
        value_type: DataObjectType,
        scaler_unit: ScalerUnit,
    ) -> DlmsResult<Self> {
        let schema = Self::base_schema(Self::CLASS_ID, logical_name, value_type)
            .with_method(Self::METHOD_RESET, "reset");
        Self::with_schema(schema, value_type, scaler_unit)
    }

    /// Attributes 1 to 4, shared with classes that extend the register
    pub(crate) fn base_schema(
        class_id: u16,
        logical_name: ObisCode,
        value_type: DataObjectType,
    ) -> ObjectSchema {
        ObjectSchema::new(class_id, logical_name)
            .with_attribute(Self::ATTR_VALUE, "value", value_type, AttributeAccess::ReadWrite)
            .with_attribute(
                Self::ATTR_SCALER_UNIT,
                "scaler_unit",
                DataObjectType::Structure,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_STATUS,
                "status",
                DataObjectType::Unsigned,
                AttributeAccess::ReadWrite,
            )
    }

    pub(crate) fn with_schema(
        schema: ObjectSchema,
        value_type: DataObjectType,
        scaler_unit: ScalerUnit,
    ) -> DlmsResult<Self> {
        if !value_type.is_number() {
            return Err(DlmsError::TypeMismatch(format!(
                "register value type must be numeric, got {}",
                value_type
            )));
        }
        Ok(Self {
            schema,
            value_type,
            state: RwLock::new(RegisterState {
                value: zero(value_type)?,
                scaler_unit,
                status: 0,
            }),
        })
    }

    pub fn value_type(&self) -> DataObjectType {
        self.value_type
    }

    /// Unscaled value
    pub async fn value(&self) -> DataObject {
        self.state.read().await.value.clone()
    }

    /// Replace the unscaled value, converted to the declared type
    pub async fn set_value(&self, value: DataObject) -> DlmsResult<()> {
        let value = value.coerce_to(self.value_type)?;
        self.state.write().await.value = value;
        Ok(())
    }

    /// Store a raw reading; integer registers round to the nearest step
    ///
    /// # Errors
    /// [`DlmsError::InvalidData`] for NaN or infinite readings.
    pub async fn set_reading(&self, reading: f64) -> DlmsResult<()> {
        if !reading.is_finite() {
            return Err(DlmsError::InvalidData(format!(
                "{} reading {} is not finite",
                self.schema.logical_name(),
                reading
            )));
        }
        let value = if matches!(self.value_type, DataObjectType::Float32 | DataObjectType::Float64) {
            DataObject::Float64(reading)
        } else {
            DataObject::Integer64(reading.round() as i64)
        };
        self.set_value(value).await
    }

    pub async fn scaler_unit(&self) -> ScalerUnit {
        self.state.read().await.scaler_unit
    }

    pub async fn set_scaler_unit(&self, scaler_unit: ScalerUnit) {
        self.state.write().await.scaler_unit = scaler_unit;
    }

    pub async fn status(&self) -> u8 {
        self.state.read().await.status
    }

    pub async fn set_status(&self, status: u8) {
        self.state.write().await.status = status;
    }

    /// `value * 10^scaler`
    pub async fn scaled_value(&self) -> DlmsResult<f64> {
        let state = self.state.read().await;
        Ok(state.scaler_unit.scale_value(state.value.as_f64()?))
    }

    /// Zero the value and the status
    pub async fn reset(&self) -> DlmsResult<()> {
        let zero = zero(self.value_type)?;
        let mut state = self.state.write().await;
        state.value = zero;
        state.status = 0;
        Ok(())
    }
}

fn zero(value_type: DataObjectType) -> DlmsResult<DataObject> {
    DataObject::Unsigned8(0).coerce_to(value_type)
}

#[async_trait]
impl CosemObject for Register {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            Self::ATTR_VALUE => Ok(self.value().await),
            Self::ATTR_SCALER_UNIT => Ok(self.scaler_unit().await.to_data_object()),
            Self::ATTR_STATUS => Ok(DataObject::Unsigned8(self.status().await)),
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_VALUE => self.set_value(value).await,
            Self::ATTR_SCALER_UNIT => {
                let scaler_unit = ScalerUnit::from_data_object(&value)?;
                self.set_scaler_unit(scaler_unit).await;
                Ok(())
            }
            Self::ATTR_STATUS => {
                let status = u8::try_from(value.as_i64()?).map_err(|_| {
                    DlmsError::TypeMismatch(format!("status {} is not an unsigned8", value))
                })?;
                self.set_status(status).await;
                Ok(())
            }
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_action(
        &self,
        method_id: u8,
        _parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_RESET => {
                self.reset().await?;
                Ok(None)
            }
            _ => Err(self.schema.invalid_method(method_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler_unit::units;

    fn energy_register() -> Register {
        Register::new(
            ObisCode::new(1, 0, 1, 8, 0, 255),
            DataObjectType::DoubleLongUnsigned,
            ScalerUnit::new(0, units::WATT_HOUR),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_class_id() {
        let register = energy_register();
        assert_eq!(register.class_id(), 3);
        assert_eq!(register.value().await, DataObject::Unsigned32(0));
    }

    #[tokio::test]
    async fn test_register_get_attribute() {
        let register = energy_register();
        register.set_reading(12345.4).await.unwrap();
        register.set_status(2).await;

        assert_eq!(register.get_attribute(2).await.unwrap(), DataObject::Unsigned32(12345));
        assert_eq!(
            register.get_attribute(3).await.unwrap(),
            DataObject::Structure(vec![DataObject::Integer8(0), DataObject::Enumerate(30)])
        );
        assert_eq!(register.get_attribute(4).await.unwrap(), DataObject::Unsigned8(2));
    }

    #[tokio::test]
    async fn test_register_scaled_value() {
        let register = Register::new(
            ObisCode::new(1, 0, 32, 7, 0, 255),
            DataObjectType::Float64,
            ScalerUnit::new(0, units::VOLT),
        )
        .unwrap();
        register.set_value(DataObject::Float64(2.5)).await.unwrap();

        for scaler in -10i8..=10 {
            register.set_scaler_unit(ScalerUnit::new(scaler, units::VOLT)).await;
            let expected = 2.5 * 10_f64.powi(i32::from(scaler));
            let scaled = register.scaled_value().await.unwrap();
            assert!((scaled - expected).abs() <= expected.abs() * 1e-12);
        }
    }

    #[tokio::test]
    async fn test_register_reset() {
        let register = energy_register();
        register.set_reading(500.0).await.unwrap();
        register.set_status(0x80).await;

        assert_eq!(register.invoke_method(1, None).await.unwrap(), None);
        assert_eq!(register.value().await, DataObject::Unsigned32(0));
        assert_eq!(register.status().await, 0);
    }

    #[tokio::test]
    async fn test_register_rejects_out_of_range_value() {
        let register = energy_register();
        assert!(matches!(
            register.set_attribute(2, DataObject::Integer32(-1)).await,
            Err(DlmsError::TypeMismatch(_))
        ));
        assert!(Register::new(
            ObisCode::new(1, 0, 1, 8, 0, 255),
            DataObjectType::OctetString,
            ScalerUnit::none()
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_register_rejects_non_finite_reading() {
        let register = energy_register();
        register.set_reading(42.0).await.unwrap();

        for reading in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(register.set_reading(reading).await, Err(DlmsError::InvalidData(_))));
        }
        assert_eq!(register.value().await, DataObject::Unsigned32(42));
    }

    #[tokio::test]
    async fn test_register_invalid_ids() {
        let register = energy_register();
        assert!(matches!(
            register.get_attribute(99).await,
            Err(DlmsError::InvalidAttributeId { class_id: 3, attribute_id: 99 })
        ));
        assert!(matches!(
            register.invoke_method(2, None).await,
            Err(DlmsError::InvalidMethodId { class_id: 3, method_id: 2 })
        ));
        assert_eq!(
            register.set_attribute(1, DataObject::OctetString(vec![1, 0, 1, 8, 0, 255])).await,
            Err(DlmsError::ReadOnlyViolation(1))
        );
    }
}
