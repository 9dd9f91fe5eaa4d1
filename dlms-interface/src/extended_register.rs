//! Extended Register interface class (Class ID: 4)
//!
//! An Extended Register is a Register that also records when its value was
//! captured and whether the status is valid. It embeds a [`Register`] and
//! forwards every attribute and method it does not own to it.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: value - The register value
//! - Attribute 3: scaler_unit - Scaler and unit for the value
//! - Attribute 4: status - Status information for the register
//! - Attribute 5: capture_time - Timestamp of the last value capture
//! - Attribute 6: status_valid - Whether the status reflects the captured value (read-only)
//!
//! # Methods
//!
//! - Method 1: reset - Zero the value and the status
//! - Method 2: capture - Stamp the current time and mark the status valid

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use crate::register::Register;
use crate::scaler_unit::ScalerUnit;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use dlms_core::{DataObject, DataObjectType, DlmsResult, ObisCode};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct CaptureState {
    capture_time: Option<NaiveDateTime>,
    status_valid: bool,
}

/// Extended Register interface class (Class ID: 4)
///
/// Maximum demand registers are the typical use: the value is the highest
/// demand seen so far and the capture time says when it occurred.
#[derive(Debug)]
pub struct ExtendedRegister {
    schema: ObjectSchema,
    register: Register,
    capture: RwLock<CaptureState>,
}

impl ExtendedRegister {
    pub const CLASS_ID: u16 = 4;

    /// Attribute IDs
    pub const ATTR_CAPTURE_TIME: u8 = 5;
    pub const ATTR_STATUS_VALID: u8 = 6;

    /// Method IDs
    pub const METHOD_RESET: u8 = Register::METHOD_RESET;
    pub const METHOD_CAPTURE: u8 = 2;

    pub fn new(
        logical_name: ObisCode,
        value_type: DataObjectType,
        scaler_unit: ScalerUnit,
    ) -> DlmsResult<Self> {
        let schema = Register::base_schema(Self::CLASS_ID, logical_name, value_type)
            .with_attribute(
                Self::ATTR_CAPTURE_TIME,
                "capture_time",
                DataObjectType::DateTime,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_STATUS_VALID,
                "status_valid",
                DataObjectType::Boolean,
                AttributeAccess::ReadOnly,
            )
            .with_method(Self::METHOD_RESET, "reset")
            .with_method(Self::METHOD_CAPTURE, "capture");
        Ok(Self {
            register: Register::new(logical_name, value_type, scaler_unit)?,
            schema,
            capture: RwLock::new(CaptureState::default()),
        })
    }

    /// The embedded register holding value, scaler-unit and status
    pub fn register(&self) -> &Register {
        &self.register
    }

    pub async fn capture_time(&self) -> Option<NaiveDateTime> {
        self.capture.read().await.capture_time
    }

    pub async fn status_valid(&self) -> bool {
        self.capture.read().await.status_valid
    }

    pub async fn capture(&self) {
        self.capture_at(Utc::now().naive_utc()).await;
    }

    /// Stamp `now` as capture time and mark the status valid
    pub async fn capture_at(&self, now: NaiveDateTime) {
        let mut capture = self.capture.write().await;
        capture.capture_time = Some(now);
        capture.status_valid = true;
    }

    /// Forget the capture time and mark the status invalid
    pub async fn clear_capture(&self) {
        *self.capture.write().await = CaptureState::default();
    }
}

#[async_trait]
impl CosemObject for ExtendedRegister {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            Self::ATTR_CAPTURE_TIME => Ok(self
                .capture_time()
                .await
                .map_or(DataObject::Null, DataObject::DateTime)),
            Self::ATTR_STATUS_VALID => Ok(DataObject::Boolean(self.status_valid().await)),
            _ => self.register.handle_get(attribute_id).await,
        }
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_CAPTURE_TIME => {
                let capture_time = match value {
                    DataObject::Null => None,
                    other => Some(other.as_date_time()?),
                };
                self.capture.write().await.capture_time = capture_time;
                Ok(())
            }
            _ => self.register.handle_set(attribute_id, value).await,
        }
    }

    async fn handle_action(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_CAPTURE => {
                self.capture().await;
                Ok(None)
            }
            _ => self.register.handle_action(method_id, parameters).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler_unit::units;
    use chrono::NaiveDate;
    use dlms_core::DlmsError;

    fn demand_register() -> ExtendedRegister {
        ExtendedRegister::new(
            ObisCode::new(1, 0, 1, 6, 0, 255),
            DataObjectType::DoubleLongUnsigned,
            ScalerUnit::new(0, units::WATT),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_extended_register_class_id() {
        let register = demand_register();
        assert_eq!(register.class_id(), 4);
        assert_eq!(register.get_attribute(5).await.unwrap(), DataObject::Null);
        assert_eq!(register.get_attribute(6).await.unwrap(), DataObject::Boolean(false));
    }

    #[tokio::test]
    async fn test_capture_stamps_time_and_validates_status() {
        let register = demand_register();
        let before = Utc::now().naive_utc();
        register.invoke_method(2, None).await.unwrap();

        let captured = register.capture_time().await.unwrap();
        assert!(captured >= before);
        assert!(register.status_valid().await);
    }

    #[tokio::test]
    async fn test_status_valid_is_read_only() {
        let register = demand_register();
        assert_eq!(
            register.set_attribute(6, DataObject::Boolean(true)).await,
            Err(DlmsError::ReadOnlyViolation(6))
        );
    }

    #[tokio::test]
    async fn test_register_attributes_are_delegated() {
        let register = demand_register();
        register.set_attribute(2, DataObject::Unsigned32(4200)).await.unwrap();
        assert_eq!(register.get_attribute(2).await.unwrap(), DataObject::Unsigned32(4200));
        assert_eq!(register.register().scaled_value().await.unwrap(), 4200.0);

        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 15, 0)
            .unwrap();
        register.set_attribute(5, DataObject::DateTime(at)).await.unwrap();
        assert_eq!(register.capture_time().await, Some(at));

        register.invoke_method(1, None).await.unwrap();
        assert_eq!(register.get_attribute(2).await.unwrap(), DataObject::Unsigned32(0));
        assert!(matches!(
            register.invoke_method(3, None).await,
            Err(DlmsError::InvalidMethodId { class_id: 4, method_id: 3 })
        ));
    }
}
