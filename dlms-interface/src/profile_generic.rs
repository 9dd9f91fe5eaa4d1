//! Profile Generic interface class (Class ID: 7)
//!
//! A profile generic captures the values of a list of attributes of other
//! objects into a bounded buffer. When the buffer is full the oldest entry is
//! dropped, so `entries_in_use` never exceeds `profile_entries`.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: buffer - Captured rows, oldest first (read-only)
//! - Attribute 3: capture_objects - Array of `{class_id, logical_name, attribute_index, data_index}`
//! - Attribute 4: capture_period - Seconds between automatic captures, 0 for none
//! - Attribute 5: sort_method - How the buffer is ordered
//! - Attribute 6: entries_in_use - Number of rows in the buffer (read-only)
//! - Attribute 7: profile_entries - Buffer capacity
//!
//! # Methods
//!
//! - Method 1: reset - Clear the buffer
//! - Method 2: capture - Append one row
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::{CaptureObject, Clock, ObjectRegistry, ProfileGeneric};
//! use dlms_core::ObisCode;
//! use std::sync::Arc;
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! let registry = Arc::new(ObjectRegistry::new());
//! let profile = ProfileGeneric::new(ObisCode::new(1, 0, 99, 1, 0, 255), 96, Arc::downgrade(&registry));
//! profile.add_capture_object(CaptureObject::new(Clock::CLASS_ID, Clock::default_obis(), 2)).await;
//! profile.capture().await?;
//! # Ok(())
//! # }
//! ```

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use crate::registry::{self, ObjectRegistry};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use std::collections::VecDeque;
use std::sync::Weak;
use tokio::sync::RwLock;

/// Default capture period: 15 minutes
pub const DEFAULT_CAPTURE_PERIOD: u32 = 900;

/// One captured attribute, also used as push object definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureObject {
    pub class_id: u16,
    pub logical_name: ObisCode,
    pub attribute_index: u8,
    /// 0 captures the whole attribute
    pub data_index: u16,
}

impl CaptureObject {
    pub fn new(class_id: u16, logical_name: ObisCode, attribute_index: u8) -> Self {
        Self {
            class_id,
            logical_name,
            attribute_index,
            data_index: 0,
        }
    }

    /// Encode as `structure{class_id, logical_name, attribute_index, data_index}`
    ///
    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] if the attribute index does not fit the
    /// signed 8-bit wire field.
    pub(crate) fn to_data_object(self) -> DlmsResult<DataObject> {
        let attribute_index = i8::try_from(self.attribute_index).map_err(|_| {
            DlmsError::RangeViolation(format!(
                "capture object attribute index {} out of range",
                self.attribute_index
            ))
        })?;
        Ok(DataObject::Structure(vec![
            DataObject::Unsigned16(self.class_id),
            DataObject::OctetString(self.logical_name.to_bytes().to_vec()),
            DataObject::Integer8(attribute_index),
            DataObject::Unsigned16(self.data_index),
        ]))
    }

    pub(crate) fn from_data_object(value: &DataObject) -> DlmsResult<Self> {
        let fields = value.as_structure_of(4)?;
        let out_of_range = |what: &str| DlmsError::RangeViolation(format!("capture object {} out of range", what));
        Ok(Self {
            class_id: u16::try_from(fields[0].as_i64()?).map_err(|_| out_of_range("class id"))?,
            logical_name: ObisCode::from_bytes(fields[1].as_octet_string()?)?,
            attribute_index: i8::try_from(fields[2].as_i64()?)
                .ok()
                .and_then(|index| u8::try_from(index).ok())
                .ok_or_else(|| out_of_range("attribute index"))?,
            data_index: u16::try_from(fields[3].as_i64()?).map_err(|_| out_of_range("data index"))?,
        })
    }
}

/// One buffer row
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub timestamp: NaiveDateTime,
    pub values: Vec<DataObject>,
}

impl ProfileEntry {
    fn to_data_object(&self) -> DataObject {
        let mut fields = Vec::with_capacity(self.values.len() + 1);
        fields.push(DataObject::DateTime(self.timestamp));
        fields.extend(self.values.iter().cloned());
        DataObject::Structure(fields)
    }
}

/// Buffer ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortMethod {
    #[default]
    Fifo = 1,
    Lifo = 2,
    Largest = 3,
    Smallest = 4,
    NearestToZero = 5,
    FarthestFromZero = 6,
}

impl SortMethod {
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            1 => Ok(SortMethod::Fifo),
            2 => Ok(SortMethod::Lifo),
            3 => Ok(SortMethod::Largest),
            4 => Ok(SortMethod::Smallest),
            5 => Ok(SortMethod::NearestToZero),
            6 => Ok(SortMethod::FarthestFromZero),
            _ => Err(DlmsError::RangeViolation(format!(
                "sort method {} not in 1..=6",
                id
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProfileState {
    buffer: VecDeque<ProfileEntry>,
    capture_objects: Vec<CaptureObject>,
    capture_period: u32,
    sort_method: SortMethod,
    profile_entries: u32,
}

impl ProfileState {
    fn evict_overflow(&mut self) {
        while self.buffer.len() > self.profile_entries as usize {
            self.buffer.pop_front();
        }
    }
}

/// Profile Generic interface class (Class ID: 7)
pub struct ProfileGeneric {
    schema: ObjectSchema,
    registry: Weak<ObjectRegistry>,
    state: RwLock<ProfileState>,
}

impl ProfileGeneric {
    pub const CLASS_ID: u16 = 7;

    /// Attribute IDs
    pub const ATTR_BUFFER: u8 = 2;
    pub const ATTR_CAPTURE_OBJECTS: u8 = 3;
    pub const ATTR_CAPTURE_PERIOD: u8 = 4;
    pub const ATTR_SORT_METHOD: u8 = 5;
    pub const ATTR_ENTRIES_IN_USE: u8 = 6;
    pub const ATTR_PROFILE_ENTRIES: u8 = 7;

    /// Method IDs
    pub const METHOD_RESET: u8 = 1;
    pub const METHOD_CAPTURE: u8 = 2;

    /// Create an empty profile holding at most `profile_entries` rows
    /// (at least one)
    pub fn new(logical_name: ObisCode, profile_entries: u32, registry: Weak<ObjectRegistry>) -> Self {
        let schema = ObjectSchema::new(Self::CLASS_ID, logical_name)
            .with_attribute(Self::ATTR_BUFFER, "buffer", DataObjectType::Array, AttributeAccess::ReadOnly)
            .with_attribute(
                Self::ATTR_CAPTURE_OBJECTS,
                "capture_objects",
                DataObjectType::Array,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_CAPTURE_PERIOD,
                "capture_period",
                DataObjectType::DoubleLongUnsigned,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_SORT_METHOD,
                "sort_method",
                DataObjectType::Enumerate,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_ENTRIES_IN_USE,
                "entries_in_use",
                DataObjectType::DoubleLongUnsigned,
                AttributeAccess::ReadOnly,
            )
            .with_attribute(
                Self::ATTR_PROFILE_ENTRIES,
                "profile_entries",
                DataObjectType::DoubleLongUnsigned,
                AttributeAccess::ReadWrite,
            )
            .with_method(Self::METHOD_RESET, "reset")
            .with_method(Self::METHOD_CAPTURE, "capture");
        Self {
            schema,
            registry,
            state: RwLock::new(ProfileState {
                buffer: VecDeque::new(),
                capture_objects: Vec::new(),
                capture_period: DEFAULT_CAPTURE_PERIOD,
                sort_method: SortMethod::default(),
                profile_entries: profile_entries.max(1),
            }),
        }
    }

    pub async fn add_capture_object(&self, capture_object: CaptureObject) {
        self.state.write().await.capture_objects.push(capture_object);
    }

    pub async fn capture_objects(&self) -> Vec<CaptureObject> {
        self.state.read().await.capture_objects.clone()
    }

    /// Replace the capture list; rows of the old layout are discarded
    pub async fn set_capture_objects(&self, capture_objects: Vec<CaptureObject>) {
        let mut state = self.state.write().await;
        state.capture_objects = capture_objects;
        state.buffer.clear();
    }

    pub async fn capture_period(&self) -> u32 {
        self.state.read().await.capture_period
    }

    pub async fn set_capture_period(&self, capture_period: u32) {
        self.state.write().await.capture_period = capture_period;
    }

    pub async fn sort_method(&self) -> SortMethod {
        self.state.read().await.sort_method
    }

    pub async fn profile_entries(&self) -> u32 {
        self.state.read().await.profile_entries
    }

    /// Change the capacity; shrinking drops the oldest rows
    ///
    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] for a capacity of zero.
    pub async fn set_profile_entries(&self, profile_entries: u32) -> DlmsResult<()> {
        if profile_entries == 0 {
            return Err(DlmsError::RangeViolation(
                "profile entries must be at least 1".to_string(),
            ));
        }
        let mut state = self.state.write().await;
        state.profile_entries = profile_entries;
        state.evict_overflow();
        Ok(())
    }

    pub async fn entries_in_use(&self) -> u32 {
        self.state.read().await.buffer.len() as u32
    }

    /// Buffer rows, oldest first
    pub async fn entries(&self) -> Vec<ProfileEntry> {
        self.state.read().await.buffer.iter().cloned().collect()
    }

    /// Rows with `from <= timestamp <= to`
    pub async fn entries_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<ProfileEntry> {
        self.state
            .read()
            .await
            .buffer
            .iter()
            .filter(|entry| entry.timestamp >= from && entry.timestamp <= to)
            .cloned()
            .collect()
    }

    pub async fn latest_entry(&self) -> Option<ProfileEntry> {
        self.state.read().await.buffer.back().cloned()
    }

    pub async fn reset(&self) {
        self.state.write().await.buffer.clear();
    }

    pub async fn capture(&self) -> DlmsResult<()> {
        self.capture_at(Utc::now().naive_utc()).await
    }

    /// Append a row stamped `now`, reading every capture object through the
    /// registry. Objects that cannot be read are captured as null.
    pub async fn capture_at(&self, now: NaiveDateTime) -> DlmsResult<()> {
        let registry = registry::upgrade(&self.registry)?;
        let capture_objects = self.capture_objects().await;
        let values = read_values(&registry, &capture_objects, self.schema.logical_name()).await;

        let mut state = self.state.write().await;
        state.buffer.push_back(ProfileEntry {
            timestamp: now,
            values,
        });
        state.evict_overflow();
        Ok(())
    }
}

/// Read every object definition through `registry`. Values that cannot be
/// read are logged against `owner` and replaced by null.
pub(crate) async fn read_values(
    registry: &ObjectRegistry,
    definitions: &[CaptureObject],
    owner: ObisCode,
) -> Vec<DataObject> {
    let mut values = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let value = match registry
            .resolve(definition.class_id, &definition.logical_name)
            .await
        {
            Ok(object) => object
                .get_attribute(definition.attribute_index)
                .await
                .map(|value| select_element(value, definition.data_index)),
            Err(e) => Err(e),
        };
        values.push(value.unwrap_or_else(|e| {
            log::warn!(
                "{} read of {}/{} failed: {}",
                owner,
                definition.logical_name,
                definition.attribute_index,
                e
            );
            DataObject::Null
        }));
    }
    values
}

/// Pick element `data_index` (1-based) of an array or structure value
fn select_element(value: DataObject, data_index: u16) -> DataObject {
    if data_index == 0 {
        return value;
    }
    match value {
        DataObject::Array(items) | DataObject::Structure(items) => items
            .into_iter()
            .nth(usize::from(data_index) - 1)
            .unwrap_or(DataObject::Null),
        other => other,
    }
}

#[async_trait]
impl CosemObject for ProfileGeneric {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        let state = self.state.read().await;
        let value = match attribute_id {
            Self::ATTR_BUFFER => {
                DataObject::Array(state.buffer.iter().map(ProfileEntry::to_data_object).collect())
            }
            Self::ATTR_CAPTURE_OBJECTS => DataObject::Array(
                state
                    .capture_objects
                    .iter()
                    .map(|capture_object| capture_object.to_data_object())
                    .collect::<DlmsResult<_>>()?,
            ),
            Self::ATTR_CAPTURE_PERIOD => DataObject::Unsigned32(state.capture_period),
            Self::ATTR_SORT_METHOD => DataObject::Enumerate(state.sort_method as u8),
            Self::ATTR_ENTRIES_IN_USE => DataObject::Unsigned32(state.buffer.len() as u32),
            Self::ATTR_PROFILE_ENTRIES => DataObject::Unsigned32(state.profile_entries),
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        };
        Ok(value)
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_CAPTURE_OBJECTS => {
                let capture_objects = value
                    .as_array()?
                    .iter()
                    .map(CaptureObject::from_data_object)
                    .collect::<DlmsResult<Vec<_>>>()?;
                self.set_capture_objects(capture_objects).await;
                Ok(())
            }
            Self::ATTR_CAPTURE_PERIOD => {
                let DataObject::Unsigned32(period) = value.coerce_to(DataObjectType::DoubleLongUnsigned)?
                else {
                    return Err(DlmsError::TypeMismatch("capture period".to_string()));
                };
                self.set_capture_period(period).await;
                Ok(())
            }
            Self::ATTR_SORT_METHOD => {
                let sort_method = u8::try_from(value.as_i64()?)
                    .map_err(|_| DlmsError::RangeViolation(format!("sort method {}", value)))
                    .and_then(SortMethod::from_id)?;
                self.state.write().await.sort_method = sort_method;
                Ok(())
            }
            Self::ATTR_PROFILE_ENTRIES => {
                let DataObject::Unsigned32(entries) = value.coerce_to(DataObjectType::DoubleLongUnsigned)?
                else {
                    return Err(DlmsError::TypeMismatch("profile entries".to_string()));
                };
                self.set_profile_entries(entries).await
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
            Self::METHOD_RESET => self.reset().await,
            Self::METHOD_CAPTURE => self.capture().await?,
            _ => return Err(self.schema.invalid_method(method_id)),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Register;
    use crate::scaler_unit::{units, ScalerUnit};
    use chrono::NaiveDate;
    use std::sync::Arc;

    const ENERGY: ObisCode = ObisCode::new(1, 0, 1, 8, 0, 255);
    const LOAD_PROFILE: ObisCode = ObisCode::new(1, 0, 99, 1, 0, 255);

    fn minute(m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, m, 0)
            .unwrap()
    }

    async fn setup(capacity: u32) -> (Arc<ObjectRegistry>, Arc<ProfileGeneric>, Arc<Register>) {
        let registry = Arc::new(ObjectRegistry::new());
        let energy = Arc::new(
            Register::new(ENERGY, DataObjectType::DoubleLongUnsigned, ScalerUnit::new(0, units::WATT_HOUR))
                .unwrap(),
        );
        registry.register(energy.clone()).await.unwrap();

        let profile = Arc::new(ProfileGeneric::new(LOAD_PROFILE, capacity, Arc::downgrade(&registry)));
        profile
            .add_capture_object(CaptureObject::new(Register::CLASS_ID, ENERGY, 2))
            .await;
        registry.register(profile.clone()).await.unwrap();
        (registry, profile, energy)
    }

    #[tokio::test]
    async fn test_profile_generic_class_id() {
        let (_registry, profile, _) = setup(4).await;
        assert_eq!(profile.class_id(), 7);
        assert_eq!(profile.capture_period().await, 900);
    }

    #[tokio::test]
    async fn test_capture_reads_registry_values() {
        let (_registry, profile, energy) = setup(4).await;
        energy.set_reading(100.0).await.unwrap();
        profile.capture_at(minute(0)).await.unwrap();
        energy.set_reading(250.0).await.unwrap();
        profile.capture_at(minute(15)).await.unwrap();

        let entries = profile.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].values, vec![DataObject::Unsigned32(100)]);
        assert_eq!(entries[1].values, vec![DataObject::Unsigned32(250)]);
        assert_eq!(profile.latest_entry().await.unwrap().timestamp, minute(15));
        assert_eq!(profile.entries_between(minute(10), minute(20)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_buffer_is_fifo_bounded() {
        let (_registry, profile, energy) = setup(3).await;
        for m in 0..5u32 {
            energy.set_reading(f64::from(m)).await.unwrap();
            profile.capture_at(minute(m)).await.unwrap();
            assert_eq!(profile.entries_in_use().await, (m + 1).min(3));
        }
        let entries = profile.entries().await;
        assert_eq!(entries[0].timestamp, minute(2));
        assert_eq!(profile.get_attribute(6).await.unwrap(), DataObject::Unsigned32(3));
    }

    #[tokio::test]
    async fn test_missing_capture_object_is_null() {
        let (_registry, profile, _) = setup(3).await;
        profile
            .add_capture_object(CaptureObject::new(3, ObisCode::new(1, 0, 2, 8, 0, 255), 2))
            .await;
        profile.capture_at(minute(0)).await.unwrap();
        assert_eq!(
            profile.latest_entry().await.unwrap().values,
            vec![DataObject::Unsigned32(0), DataObject::Null]
        );
    }

    #[tokio::test]
    async fn test_reset_and_shrink() {
        let (_registry, profile, _) = setup(5).await;
        for m in 0..5u32 {
            profile.invoke_method(2, None).await.unwrap();
            profile.capture_at(minute(m)).await.unwrap();
        }
        assert_eq!(profile.entries_in_use().await, 5);

        profile.set_attribute(7, DataObject::Unsigned32(2)).await.unwrap();
        assert_eq!(profile.entries_in_use().await, 2);
        assert_eq!(profile.entries().await[1].timestamp, minute(4));
        assert!(profile.set_profile_entries(0).await.is_err());

        profile.invoke_method(1, None).await.unwrap();
        assert_eq!(profile.entries_in_use().await, 0);
        assert_eq!(
            profile.set_attribute(6, DataObject::Unsigned32(1)).await,
            Err(DlmsError::ReadOnlyViolation(6))
        );
    }

    #[tokio::test]
    async fn test_capture_objects_attribute() {
        let (_registry, profile, _) = setup(5).await;
        profile.capture_at(minute(0)).await.unwrap();

        let capture_objects = profile.get_attribute(3).await.unwrap();
        profile.set_attribute(3, capture_objects).await.unwrap();
        assert_eq!(profile.capture_objects().await, vec![CaptureObject::new(3, ENERGY, 2)]);
        assert_eq!(profile.entries_in_use().await, 0);
    }

    #[tokio::test]
    async fn test_capture_object_attribute_index_must_fit_wire_field() {
        let (_registry, profile, _) = setup(5).await;
        profile
            .add_capture_object(CaptureObject::new(Register::CLASS_ID, ENERGY, 200))
            .await;
        assert!(matches!(
            profile.get_attribute(3).await,
            Err(DlmsError::RangeViolation(_))
        ));

        let wrapped = DataObject::Array(vec![DataObject::Structure(vec![
            DataObject::Unsigned16(3),
            DataObject::OctetString(ENERGY.to_bytes().to_vec()),
            DataObject::Integer8(-56),
            DataObject::Unsigned16(0),
        ])]);
        assert!(matches!(
            profile.set_attribute(3, wrapped).await,
            Err(DlmsError::RangeViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_fails_without_registry() {
        let profile = ProfileGeneric::new(LOAD_PROFILE, 5, Weak::new());
        assert!(matches!(
            profile.capture().await,
            Err(DlmsError::InvalidState(_))
        ));
    }
}
