//! Data interface class (Class ID: 1)
//!
//! The Data interface class is the simplest COSEM interface class.
//! It holds a single value of a declared DLMS type.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: value - The data value, always of the declared type
//!
//! # Methods
//!
//! None
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::Data;
//! use dlms_core::{DataObject, DataObjectType, ObisCode};
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! let obis = ObisCode::new(0, 0, 96, 1, 0, 255);
//! let data = Data::new(obis, DataObjectType::LongInteger, DataObject::Integer16(-5))?;
//!
//! // Values are converted to the declared type; out of range values fail
//! data.set_value(DataObject::Integer32(1200)).await?;
//! assert_eq!(data.value().await, DataObject::Integer16(1200));
//! # Ok(())
//! # }
//! ```

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsResult, ObisCode};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct Data {
    schema: ObjectSchema,
    data_type: DataObjectType,
    value: RwLock<DataObject>,
}

impl Data {
    pub const CLASS_ID: u16 = 1;

    /// Attribute IDs
    pub const ATTR_VALUE: u8 = 2;

    /// Create a Data object holding `value` converted to `data_type`
    ///
    /// # Errors
    ///
    /// Returns [`dlms_core::DlmsError::TypeMismatch`] if the initial value does
    /// not fit the declared type.
    pub fn new(
        logical_name: ObisCode,
        data_type: DataObjectType,
        value: DataObject,
    ) -> DlmsResult<Self> {
        Self::with_access(logical_name, data_type, value, AttributeAccess::ReadWrite)
    }

    pub fn with_access(
        logical_name: ObisCode,
        data_type: DataObjectType,
        value: DataObject,
        access: AttributeAccess,
    ) -> DlmsResult<Self> {
        let value = value.coerce_to(data_type)?;
        Ok(Self {
            schema: ObjectSchema::new(Self::CLASS_ID, logical_name)
                .with_attribute(Self::ATTR_VALUE, "value", data_type, access),
            data_type,
            value: RwLock::new(value),
        })
    }

    pub fn data_type(&self) -> DataObjectType {
        self.data_type
    }

    pub async fn value(&self) -> DataObject {
        self.value.read().await.clone()
    }

    /// Replace the value after converting it to the declared type
    pub async fn set_value(&self, value: DataObject) -> DlmsResult<()> {
        let value = value.coerce_to(self.data_type)?;
        *self.value.write().await = value;
        Ok(())
    }
}

#[async_trait]
impl CosemObject for Data {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            Self::ATTR_VALUE => Ok(self.value().await),
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_VALUE => self.set_value(value).await,
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }
}
