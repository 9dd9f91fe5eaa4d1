//! Billing profile
//!
//! A [`ProfileGeneric`] preconfigured to snapshot the billing registers of a
//! meter once per billing period. The profile owns the registers it captures;
//! call [`BillingProfile::install`] to make them reachable through the object
//! registry before the first capture.
//!
//! # Captured values
//!
//! Each row holds, in order: clock time, system power factor, cumulative
//! active import energy for tariffs 1..8, cumulative apparent import energy
//! for tariffs 1..8, active and apparent maximum demand per tariff (value and
//! capture time), power-on duration, active export energy, reactive energy
//! for the four quadrants, billing status word and billing reset count.

use crate::clock::Clock;
use crate::data::Data;
use crate::extended_register::ExtendedRegister;
use crate::object::{CosemObject, ObjectSchema};
use crate::profile_generic::{CaptureObject, ProfileEntry, ProfileGeneric};
use crate::register::Register;
use crate::registry::ObjectRegistry;
use crate::scaler_unit::{units, ScalerUnit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use std::sync::{Arc, Weak};

/// Billing history depth: one year of monthly rows plus the current one
pub const BILLING_ENTRIES: u32 = 13;

/// Number of tariff registers per energy kind
pub const TARIFF_COUNT: usize = 8;

/// Billing status word bits
pub mod billing_status {
    pub const NORMAL: u16 = 0x0000;
    pub const POWER_FAIL: u16 = 0x0001;
    pub const TIME_CHANGED: u16 = 0x0002;
    pub const BILLING_RESET: u16 = 0x0004;
    pub const MD_RESET: u16 = 0x0008;
    pub const PROGRAM_MODE: u16 = 0x0010;
    pub const CONFIGURATION_CHANGED: u16 = 0x0020;
    pub const FIRMWARE_UPGRADED: u16 = 0x0040;
    pub const TAMPER_DETECTED: u16 = 0x0080;
    pub const BATTERY_LOW: u16 = 0x0100;
    pub const MEMORY_ERROR: u16 = 0x0200;
    pub const COMMUNICATION_ERROR: u16 = 0x0400;
    pub const CLOCK_INVALID: u16 = 0x0800;
}

/// A partial update of the billing registers; `None` leaves a value as is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillingMeasurements {
    pub system_power_factor: Option<f64>,
    pub wh_import: Option<[f64; TARIFF_COUNT]>,
    pub vah_import: Option<[f64; TARIFF_COUNT]>,
    pub md_w_import: Option<[f64; TARIFF_COUNT]>,
    pub md_va_import: Option<[f64; TARIFF_COUNT]>,
    /// Minutes
    pub power_on_duration: Option<f64>,
    pub wh_export: Option<f64>,
    /// Reactive energy for quadrants I..IV
    pub varh: [Option<f64>; 4],
}

/// Current values of the billing registers
#[derive(Debug, Clone, PartialEq)]
pub struct BillingValues {
    pub system_power_factor: f64,
    pub wh_import: Vec<f64>,
    pub vah_import: Vec<f64>,
    pub md_w_import: Vec<f64>,
    pub md_w_import_time: Vec<Option<NaiveDateTime>>,
    pub md_va_import: Vec<f64>,
    pub md_va_import_time: Vec<Option<NaiveDateTime>>,
    pub power_on_duration: f64,
    pub wh_export: f64,
    pub varh: Vec<f64>,
    pub billing_status: u16,
    pub billing_reset_count: u32,
    pub last_reset: NaiveDateTime,
}

/// Billing profile (a Profile Generic, Class ID: 7)
pub struct BillingProfile {
    profile: ProfileGeneric,
    system_power_factor: Arc<Register>,
    wh_import: Vec<Arc<Register>>,
    vah_import: Vec<Arc<Register>>,
    md_w_import: Vec<Arc<ExtendedRegister>>,
    md_va_import: Vec<Arc<ExtendedRegister>>,
    power_on_duration: Arc<Register>,
    wh_export: Arc<Register>,
    varh: Vec<Arc<Register>>,
    billing_status: Arc<Data>,
    billing_reset_count: Arc<Data>,
    last_reset: Arc<Data>,
}

impl BillingProfile {
    pub fn default_obis() -> ObisCode {
        ObisCode::new(1, 0, 98, 1, 0, 255)
    }

    pub fn system_power_factor_obis() -> ObisCode {
        ObisCode::new(1, 0, 13, 0, 0, 255)
    }

    pub fn wh_import_obis(tariff: u8) -> ObisCode {
        ObisCode::new(1, 0, 1, 8, tariff, 255)
    }

    pub fn vah_import_obis(tariff: u8) -> ObisCode {
        ObisCode::new(1, 0, 9, 8, tariff, 255)
    }

    pub fn md_w_import_obis(tariff: u8) -> ObisCode {
        ObisCode::new(1, 0, 1, 6, tariff, 255)
    }

    pub fn md_va_import_obis(tariff: u8) -> ObisCode {
        ObisCode::new(1, 0, 9, 6, tariff, 255)
    }

    pub fn power_on_duration_obis() -> ObisCode {
        ObisCode::new(0, 0, 94, 91, 13, 255)
    }

    pub fn wh_export_obis() -> ObisCode {
        ObisCode::new(1, 0, 2, 8, 0, 255)
    }

    /// Reactive energy register for `quadrant` 1..=4
    pub fn varh_obis(quadrant: u8) -> ObisCode {
        ObisCode::new(1, 0, 4 + quadrant, 8, 0, 255)
    }

    pub fn billing_status_obis() -> ObisCode {
        ObisCode::new(0, 0, 96, 10, 1, 255)
    }

    pub fn billing_reset_count_obis() -> ObisCode {
        ObisCode::new(0, 0, 96, 15, 0, 255)
    }

    pub fn last_reset_obis() -> ObisCode {
        ObisCode::new(0, 0, 1, 2, 0, 255)
    }

    /// Build the profile, its registers and its capture list
    pub async fn new(registry: Weak<ObjectRegistry>) -> DlmsResult<Self> {
        let energy = |obis, unit| -> DlmsResult<Arc<Register>> {
            Ok(Arc::new(Register::new(
                obis,
                DataObjectType::DoubleLongUnsigned,
                ScalerUnit::new(0, unit),
            )?))
        };
        let demand = |obis, unit| -> DlmsResult<Arc<ExtendedRegister>> {
            Ok(Arc::new(ExtendedRegister::new(
                obis,
                DataObjectType::DoubleLongUnsigned,
                ScalerUnit::new(0, unit),
            )?))
        };
        let tariffs = 1..=TARIFF_COUNT as u8;

        let billing = Self {
            profile: ProfileGeneric::new(Self::default_obis(), BILLING_ENTRIES, registry),
            system_power_factor: Arc::new(Register::new(
                Self::system_power_factor_obis(),
                DataObjectType::Float64,
                ScalerUnit::none(),
            )?),
            wh_import: tariffs
                .clone()
                .map(|t| energy(Self::wh_import_obis(t), units::WATT_HOUR))
                .collect::<DlmsResult<_>>()?,
            vah_import: tariffs
                .clone()
                .map(|t| energy(Self::vah_import_obis(t), units::VOLT_AMPERE_HOUR))
                .collect::<DlmsResult<_>>()?,
            md_w_import: tariffs
                .clone()
                .map(|t| demand(Self::md_w_import_obis(t), units::WATT))
                .collect::<DlmsResult<_>>()?,
            md_va_import: tariffs
                .map(|t| demand(Self::md_va_import_obis(t), units::VOLT_AMPERE))
                .collect::<DlmsResult<_>>()?,
            power_on_duration: energy(Self::power_on_duration_obis(), units::NONE)?,
            wh_export: energy(Self::wh_export_obis(), units::WATT_HOUR)?,
            varh: (1..=4)
                .map(|q| energy(Self::varh_obis(q), units::VAR_HOUR))
                .collect::<DlmsResult<_>>()?,
            billing_status: Arc::new(Data::new(
                Self::billing_status_obis(),
                DataObjectType::LongUnsigned,
                DataObject::Unsigned16(billing_status::NORMAL),
            )?),
            billing_reset_count: Arc::new(Data::new(
                Self::billing_reset_count_obis(),
                DataObjectType::DoubleLongUnsigned,
                DataObject::Unsigned32(0),
            )?),
            last_reset: Arc::new(Data::new(
                Self::last_reset_obis(),
                DataObjectType::DateTime,
                DataObject::DateTime(DateTime::<Utc>::UNIX_EPOCH.naive_utc()),
            )?),
        };
        billing
            .profile
            .set_capture_objects(billing.capture_list())
            .await;
        Ok(billing)
    }

    fn capture_list(&self) -> Vec<CaptureObject> {
        let register = |obis| CaptureObject::new(Register::CLASS_ID, obis, Register::ATTR_VALUE);
        let data = |obis| CaptureObject::new(Data::CLASS_ID, obis, Data::ATTR_VALUE);

        let mut list = vec![
            CaptureObject::new(Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME),
            register(Self::system_power_factor_obis()),
        ];
        list.extend(self.wh_import.iter().map(|r| register(r.obis_code())));
        list.extend(self.vah_import.iter().map(|r| register(r.obis_code())));
        for md in self.md_w_import.iter().chain(&self.md_va_import) {
            list.push(CaptureObject::new(
                ExtendedRegister::CLASS_ID,
                md.obis_code(),
                Register::ATTR_VALUE,
            ));
            list.push(CaptureObject::new(
                ExtendedRegister::CLASS_ID,
                md.obis_code(),
                ExtendedRegister::ATTR_CAPTURE_TIME,
            ));
        }
        list.push(register(Self::power_on_duration_obis()));
        list.push(register(Self::wh_export_obis()));
        list.extend(self.varh.iter().map(|r| register(r.obis_code())));
        list.push(data(Self::billing_status_obis()));
        list.push(data(Self::billing_reset_count_obis()));
        list
    }

    /// Register every billing register with `registry`
    pub async fn install(&self, registry: &ObjectRegistry) -> DlmsResult<()> {
        let mut objects: Vec<Arc<dyn CosemObject>> = vec![self.system_power_factor.clone() as Arc<dyn CosemObject>];
        objects.extend(self.wh_import.iter().map(|r| r.clone() as Arc<dyn CosemObject>));
        objects.extend(self.vah_import.iter().map(|r| r.clone() as Arc<dyn CosemObject>));
        objects.extend(self.md_w_import.iter().map(|r| r.clone() as Arc<dyn CosemObject>));
        objects.extend(self.md_va_import.iter().map(|r| r.clone() as Arc<dyn CosemObject>));
        objects.push(self.power_on_duration.clone());
        objects.push(self.wh_export.clone());
        objects.extend(self.varh.iter().map(|r| r.clone() as Arc<dyn CosemObject>));
        objects.push(self.billing_status.clone());
        objects.push(self.billing_reset_count.clone());
        objects.push(self.last_reset.clone());

        for object in objects {
            registry.register(object).await?;
        }
        Ok(())
    }

    /// The underlying profile generic
    pub fn profile(&self) -> &ProfileGeneric {
        &self.profile
    }

    /// Apply the present values in `measurements`. Maximum demand updates
    /// also stamp their capture time with `now`.
    pub async fn update_measurements_at(
        &self,
        measurements: &BillingMeasurements,
        now: NaiveDateTime,
    ) -> DlmsResult<()> {
        if let Some(pf) = measurements.system_power_factor {
            if !(-1.0..=1.0).contains(&pf) {
                return Err(DlmsError::RangeViolation(format!(
                    "power factor {} not in [-1, 1]",
                    pf
                )));
            }
            self.system_power_factor.set_reading(pf).await?;
        }
        if let Some(values) = &measurements.wh_import {
            set_readings(&self.wh_import, values).await?;
        }
        if let Some(values) = &measurements.vah_import {
            set_readings(&self.vah_import, values).await?;
        }
        for (registers, values) in [
            (&self.md_w_import, &measurements.md_w_import),
            (&self.md_va_import, &measurements.md_va_import),
        ] {
            if let Some(values) = values {
                for (md, value) in registers.iter().zip(values) {
                    md.register().set_reading(*value).await?;
                    md.capture_at(now).await;
                }
            }
        }
        if let Some(minutes) = measurements.power_on_duration {
            self.power_on_duration.set_reading(minutes).await?;
        }
        if let Some(wh) = measurements.wh_export {
            self.wh_export.set_reading(wh).await?;
        }
        for (register, value) in self.varh.iter().zip(&measurements.varh) {
            if let Some(value) = value {
                register.set_reading(*value).await?;
            }
        }
        Ok(())
    }

    pub async fn update_measurements(&self, measurements: &BillingMeasurements) -> DlmsResult<()> {
        self.update_measurements_at(measurements, Utc::now().naive_utc())
            .await
    }

    /// Close the billing period at `now`
    ///
    /// Captures the closing values, clears maximum demand, raises
    /// [`billing_status::BILLING_RESET`], increments the reset count, records
    /// the reset time, then captures the opening row of the new period.
    pub async fn reset_billing_at(&self, now: NaiveDateTime) -> DlmsResult<()> {
        self.profile.capture_at(now).await?;

        for md in self.md_w_import.iter().chain(&self.md_va_import) {
            md.register().reset().await?;
            md.clear_capture().await;
        }
        self.update_billing_status(billing_status::BILLING_RESET).await?;
        let count = self.billing_reset_count().await?;
        self.billing_reset_count
            .set_value(DataObject::Unsigned32(count.wrapping_add(1)))
            .await?;
        self.last_reset.set_value(DataObject::DateTime(now)).await?;

        log::info!("Billing period closed at {} (reset #{})", now, count.wrapping_add(1));
        self.profile.capture_at(now).await
    }

    pub async fn reset_billing(&self) -> DlmsResult<()> {
        self.reset_billing_at(Utc::now().naive_utc()).await
    }

    pub async fn billing_status(&self) -> DlmsResult<u16> {
        let status = self.billing_status.value().await.as_i64()?;
        u16::try_from(status).map_err(|_| DlmsError::InvalidData(format!("billing status {}", status)))
    }

    pub async fn billing_reset_count(&self) -> DlmsResult<u32> {
        let count = self.billing_reset_count.value().await.as_i64()?;
        u32::try_from(count).map_err(|_| DlmsError::InvalidData(format!("reset count {}", count)))
    }

    /// Set `flags` in the billing status word
    pub async fn update_billing_status(&self, flags: u16) -> DlmsResult<()> {
        let status = self.billing_status().await? | flags;
        self.billing_status
            .set_value(DataObject::Unsigned16(status))
            .await
    }

    /// Clear `flags` from the billing status word
    pub async fn clear_billing_status(&self, flags: u16) -> DlmsResult<()> {
        let status = self.billing_status().await? & !flags;
        self.billing_status
            .set_value(DataObject::Unsigned16(status))
            .await
    }

    pub async fn billing_values(&self) -> DlmsResult<BillingValues> {
        let mut md_w_import_time = Vec::with_capacity(TARIFF_COUNT);
        for md in &self.md_w_import {
            md_w_import_time.push(md.capture_time().await);
        }
        let mut md_va_import_time = Vec::with_capacity(TARIFF_COUNT);
        for md in &self.md_va_import {
            md_va_import_time.push(md.capture_time().await);
        }

        Ok(BillingValues {
            system_power_factor: self.system_power_factor.scaled_value().await?,
            wh_import: scaled_values(self.wh_import.iter().map(|r| r.as_ref())).await?,
            vah_import: scaled_values(self.vah_import.iter().map(|r| r.as_ref())).await?,
            md_w_import: scaled_values(self.md_w_import.iter().map(|md| md.register())).await?,
            md_w_import_time,
            md_va_import: scaled_values(self.md_va_import.iter().map(|md| md.register())).await?,
            md_va_import_time,
            power_on_duration: self.power_on_duration.scaled_value().await?,
            wh_export: self.wh_export.scaled_value().await?,
            varh: scaled_values(self.varh.iter().map(|r| r.as_ref())).await?,
            billing_status: self.billing_status().await?,
            billing_reset_count: self.billing_reset_count().await?,
            last_reset: self.last_reset.value().await.as_date_time()?,
        })
    }

    /// Captured billing rows, oldest first
    pub async fn history(&self) -> Vec<ProfileEntry> {
        self.profile.entries().await
    }
}

async fn set_readings(registers: &[Arc<Register>], values: &[f64]) -> DlmsResult<()> {
    for (register, value) in registers.iter().zip(values) {
        register.set_reading(*value).await?;
    }
    Ok(())
}

async fn scaled_values<'a>(registers: impl Iterator<Item = &'a Register>) -> DlmsResult<Vec<f64>> {
    let mut values = Vec::new();
    for register in registers {
        values.push(register.scaled_value().await?);
    }
    Ok(values)
}

#[async_trait]
impl CosemObject for BillingProfile {
    fn schema(&self) -> &ObjectSchema {
        self.profile.schema()
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        self.profile.handle_get(attribute_id).await
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        self.profile.handle_set(attribute_id, value).await
    }

    async fn handle_action(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        self.profile.handle_action(method_id, parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    async fn setup() -> (Arc<ObjectRegistry>, Arc<BillingProfile>) {
        let registry = Arc::new(ObjectRegistry::new());
        registry.register(Arc::new(Clock::with_default_obis())).await.unwrap();
        let billing = Arc::new(BillingProfile::new(Arc::downgrade(&registry)).await.unwrap());
        billing.install(&registry).await.unwrap();
        registry.register(billing.clone()).await.unwrap();
        (registry, billing)
    }

    #[tokio::test]
    async fn test_billing_profile_layout() {
        let (registry, billing) = setup().await;
        assert_eq!(billing.class_id(), ProfileGeneric::CLASS_ID);
        assert_eq!(billing.obis_code(), ObisCode::new(1, 0, 98, 1, 0, 255));
        assert_eq!(billing.profile().profile_entries().await, 13);

        let capture_objects = billing.profile().capture_objects().await;
        assert_eq!(capture_objects.len(), 2 + 8 + 8 + 32 + 2 + 4 + 2);
        assert_eq!(capture_objects[0].logical_name, Clock::default_obis());
        // clock, 42 billing registers and the profile itself
        assert_eq!(registry.len().await, 1 + 42 + 1);
    }

    #[tokio::test]
    async fn test_update_measurements_and_values() {
        let (_registry, billing) = setup().await;
        let measurements = BillingMeasurements {
            system_power_factor: Some(0.95),
            wh_import: Some([100.0, 200.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            md_w_import: Some([1500.0; TARIFF_COUNT]),
            wh_export: Some(42.0),
            varh: [Some(1.0), None, None, Some(4.0)],
            ..Default::default()
        };
        billing.update_measurements_at(&measurements, at(1, 10)).await.unwrap();

        let values = billing.billing_values().await.unwrap();
        assert_eq!(values.system_power_factor, 0.95);
        assert_eq!(values.wh_import[1], 200.0);
        assert_eq!(values.md_w_import[7], 1500.0);
        assert_eq!(values.md_w_import_time[0], Some(at(1, 10)));
        assert_eq!(values.md_va_import_time[0], None);
        assert_eq!(values.wh_export, 42.0);
        assert_eq!(values.varh, vec![1.0, 0.0, 0.0, 4.0]);
        assert_eq!(values.billing_status, billing_status::NORMAL);
    }

    #[tokio::test]
    async fn test_power_factor_out_of_range() {
        let (_registry, billing) = setup().await;
        let measurements = BillingMeasurements {
            system_power_factor: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            billing.update_measurements(&measurements).await,
            Err(DlmsError::RangeViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_billing() {
        let (_registry, billing) = setup().await;
        let measurements = BillingMeasurements {
            md_w_import: Some([900.0; TARIFF_COUNT]),
            wh_import: Some([10.0; TARIFF_COUNT]),
            ..Default::default()
        };
        billing.update_measurements_at(&measurements, at(20, 8)).await.unwrap();
        billing.reset_billing_at(at(31, 23)).await.unwrap();

        let values = billing.billing_values().await.unwrap();
        assert_eq!(values.md_w_import, vec![0.0; TARIFF_COUNT]);
        assert_eq!(values.md_w_import_time[0], None);
        assert_eq!(values.wh_import, vec![10.0; TARIFF_COUNT]);
        assert_eq!(values.billing_reset_count, 1);
        assert_eq!(values.last_reset, at(31, 23));
        assert_ne!(values.billing_status & billing_status::BILLING_RESET, 0);

        let history = billing.history().await;
        assert_eq!(history.len(), 2);
        // row layout: time, pf, wh x8, vah x8, then md value/time pairs
        let closing = &history[0].values;
        assert_eq!(closing[18], DataObject::Unsigned32(900));
        assert_eq!(closing[19], DataObject::DateTime(at(20, 8)));
        let opening = &history[1].values;
        assert_eq!(opening[18], DataObject::Unsigned32(0));
        assert_eq!(opening[19], DataObject::Null);
        assert_eq!(opening.last(), Some(&DataObject::Unsigned32(1)));
    }

    #[tokio::test]
    async fn test_billing_status_flags() {
        let (_registry, billing) = setup().await;
        billing
            .update_billing_status(billing_status::POWER_FAIL | billing_status::TAMPER_DETECTED)
            .await
            .unwrap();
        billing.clear_billing_status(billing_status::POWER_FAIL).await.unwrap();
        assert_eq!(billing.billing_status().await.unwrap(), billing_status::TAMPER_DETECTED);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (_registry, billing) = setup().await;
        for day in 1..=20 {
            billing.profile().capture_at(at(day, 0)).await.unwrap();
        }
        let history = billing.history().await;
        assert_eq!(history.len(), 13);
        assert_eq!(history[0].timestamp, at(8, 0));
    }
}
