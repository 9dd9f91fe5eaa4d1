//! Block load profile
//!
//! A [`ProfileGeneric`] capturing instantaneous phase values, block energies,
//! meter health and signal strength once per integration period. The buffer
//! depth follows the integration period so the profile always covers the
//! same number of days.

use crate::clock::Clock;
use crate::object::{CosemObject, ObjectSchema};
use crate::profile_generic::{CaptureObject, ProfileGeneric};
use crate::register::Register;
use crate::registry::ObjectRegistry;
use crate::scaler_unit::{units, ScalerUnit};
use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use std::fmt;
use std::sync::{Arc, Weak};

/// Signal strength bounds in dBm
pub const RSSI_MIN: i32 = -120;
pub const RSSI_MAX: i32 = 0;

/// Buffer depth for an integration period in seconds
pub fn entries_for_period(capture_period: u32) -> u32 {
    match capture_period {
        600 => 4320,
        _ => 2880,
    }
}

/// Meter health indicator codes (Err 00 .. Err 12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeterHealthError {
    #[default]
    NoError = 0,
    RtcError = 1,
    MeasurementError = 2,
    NvmError = 3,
    DisplayError = 4,
    WatchdogError = 5,
    CalibrationError = 6,
    FirmwareError = 7,
    MemoryError = 8,
    CommunicationError = 9,
    BatteryError = 10,
    PowerError = 11,
    TamperError = 12,
}

impl MeterHealthError {
    pub fn from_code(code: i32) -> DlmsResult<Self> {
        let error = match code {
            0 => Self::NoError,
            1 => Self::RtcError,
            2 => Self::MeasurementError,
            3 => Self::NvmError,
            4 => Self::DisplayError,
            5 => Self::WatchdogError,
            6 => Self::CalibrationError,
            7 => Self::FirmwareError,
            8 => Self::MemoryError,
            9 => Self::CommunicationError,
            10 => Self::BatteryError,
            11 => Self::PowerError,
            12 => Self::TamperError,
            _ => {
                return Err(DlmsError::RangeViolation(format!(
                    "meter health code {} not in 0..=12",
                    code
                )))
            }
        };
        Ok(error)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::NoError => "No Error",
            Self::RtcError => "RTC Error",
            Self::MeasurementError => "Measurement Error",
            Self::NvmError => "NVM Error",
            Self::DisplayError => "Display Error",
            Self::WatchdogError => "Watchdog Error",
            Self::CalibrationError => "Calibration Error",
            Self::FirmwareError => "Firmware Error",
            Self::MemoryError => "Memory Error",
            Self::CommunicationError => "Communication Error",
            Self::BatteryError => "Battery Error",
            Self::PowerError => "Power Error",
            Self::TamperError => "Tamper Error",
        }
    }
}

impl fmt::Display for MeterHealthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Err {:02}: {}", *self as u8, self.description())
    }
}

/// A partial update; `None` leaves a value as is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockLoadMeasurements {
    /// Phase currents R, Y, B
    pub currents: [Option<f64>; 3],
    /// Phase to neutral voltages R, Y, B
    pub voltages: [Option<f64>; 3],
    pub wh_import: Option<f64>,
    pub vah_import: Option<f64>,
    pub wh_export: Option<f64>,
    pub vah_export: Option<f64>,
    pub power_factor: Option<f64>,
    pub frequency: Option<f64>,
    /// dBm
    pub signal_strength: Option<i32>,
    pub meter_health: Option<i32>,
}

/// Block load profile (a Profile Generic, Class ID: 7)
pub struct BlockLoadProfile {
    profile: ProfileGeneric,
    currents: Vec<Arc<Register>>,
    voltages: Vec<Arc<Register>>,
    /// Wh import, VAh import, Wh export, VAh export
    energies: Vec<Arc<Register>>,
    power_factor: Arc<Register>,
    frequency: Arc<Register>,
    meter_health: Arc<Register>,
    signal_strength: Arc<Register>,
}

impl BlockLoadProfile {
    pub fn default_obis() -> ObisCode {
        ObisCode::new(1, 0, 99, 1, 0, 255)
    }

    /// Current register for phase `index` 0..=2
    pub fn current_obis(index: u8) -> ObisCode {
        ObisCode::new(1, 0, 31 + 20 * index, 27, 0, 255)
    }

    /// Voltage register for phase `index` 0..=2
    pub fn voltage_obis(index: u8) -> ObisCode {
        ObisCode::new(1, 0, 32 + 20 * index, 27, 0, 255)
    }

    pub fn power_factor_obis() -> ObisCode {
        ObisCode::new(1, 0, 13, 27, 0, 255)
    }

    pub fn frequency_obis() -> ObisCode {
        ObisCode::new(1, 0, 14, 27, 0, 255)
    }

    pub fn meter_health_obis() -> ObisCode {
        ObisCode::new(0, 0, 96, 10, 2, 255)
    }

    pub fn signal_strength_obis() -> ObisCode {
        ObisCode::new(0, 1, 96, 12, 5, 255)
    }

    /// Build the profile for an integration period of `capture_period` seconds
    pub async fn new(capture_period: u32, registry: Weak<ObjectRegistry>) -> DlmsResult<Self> {
        let register = |obis, value_type, scaler, unit| -> DlmsResult<Arc<Register>> {
            Ok(Arc::new(Register::new(obis, value_type, ScalerUnit::new(scaler, unit))?))
        };
        let phase = |obis_of: fn(u8) -> ObisCode, scaler, unit| -> DlmsResult<Vec<Arc<Register>>> {
            (0..3)
                .map(|i| register(obis_of(i), DataObjectType::LongUnsigned, scaler, unit))
                .collect()
        };
        let energy = |c, unit| {
            register(
                ObisCode::new(1, 0, c, 29, 0, 255),
                DataObjectType::DoubleLongUnsigned,
                0,
                unit,
            )
        };

        let block_load = Self {
            profile: ProfileGeneric::new(
                Self::default_obis(),
                entries_for_period(capture_period),
                registry,
            ),
            currents: phase(Self::current_obis, -2, units::AMPERE)?,
            voltages: phase(Self::voltage_obis, -1, units::VOLT)?,
            energies: vec![
                energy(1, units::WATT_HOUR)?,
                energy(9, units::VOLT_AMPERE_HOUR)?,
                energy(2, units::WATT_HOUR)?,
                energy(10, units::VOLT_AMPERE_HOUR)?,
            ],
            power_factor: register(
                Self::power_factor_obis(),
                DataObjectType::LongInteger,
                -3,
                units::NONE,
            )?,
            frequency: register(
                Self::frequency_obis(),
                DataObjectType::LongUnsigned,
                -2,
                units::HERTZ,
            )?,
            meter_health: register(
                Self::meter_health_obis(),
                DataObjectType::Unsigned,
                0,
                units::NONE,
            )?,
            signal_strength: register(
                Self::signal_strength_obis(),
                DataObjectType::LongInteger,
                0,
                units::DBM,
            )?,
        };
        block_load.profile.set_capture_period(capture_period).await;
        block_load
            .profile
            .set_capture_objects(block_load.capture_list())
            .await;
        Ok(block_load)
    }

    fn registers(&self) -> Vec<Arc<Register>> {
        let mut registers = Vec::new();
        registers.extend(self.currents.iter().cloned());
        registers.extend(self.voltages.iter().cloned());
        registers.extend(self.energies.iter().cloned());
        registers.push(self.power_factor.clone());
        registers.push(self.frequency.clone());
        registers.push(self.meter_health.clone());
        registers.push(self.signal_strength.clone());
        registers
    }

    fn capture_list(&self) -> Vec<CaptureObject> {
        let mut list = vec![CaptureObject::new(
            Clock::CLASS_ID,
            Clock::default_obis(),
            Clock::ATTR_TIME,
        )];
        list.extend(
            self.registers()
                .iter()
                .map(|r| CaptureObject::new(Register::CLASS_ID, r.obis_code(), Register::ATTR_VALUE)),
        );
        list
    }

    /// Register every captured register with `registry`
    pub async fn install(&self, registry: &ObjectRegistry) -> DlmsResult<()> {
        for register in self.registers() {
            registry.register(register).await?;
        }
        Ok(())
    }

    /// The underlying profile generic
    pub fn profile(&self) -> &ProfileGeneric {
        &self.profile
    }

    /// Apply the present values in `measurements`
    ///
    /// Signal strength and meter health are checked before anything is
    /// written, so a rejected update leaves every register untouched.
    ///
    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] for a signal strength outside
    /// [-120, 0] dBm or a meter health code outside 0..=12.
    pub async fn update_measurements(&self, measurements: &BlockLoadMeasurements) -> DlmsResult<()> {
        if let Some(rssi) = measurements.signal_strength {
            if !(RSSI_MIN..=RSSI_MAX).contains(&rssi) {
                return Err(DlmsError::RangeViolation(format!(
                    "signal strength {} dBm not in [{}, {}]",
                    rssi, RSSI_MIN, RSSI_MAX
                )));
            }
        }
        let health = measurements
            .meter_health
            .map(MeterHealthError::from_code)
            .transpose()?;

        for (register, value) in self.currents.iter().zip(&measurements.currents) {
            set_scaled(register, *value).await?;
        }
        for (register, value) in self.voltages.iter().zip(&measurements.voltages) {
            set_scaled(register, *value).await?;
        }
        let energies = [
            measurements.wh_import,
            measurements.vah_import,
            measurements.wh_export,
            measurements.vah_export,
        ];
        for (register, value) in self.energies.iter().zip(energies) {
            set_scaled(register, value).await?;
        }
        set_scaled(&self.power_factor, measurements.power_factor).await?;
        set_scaled(&self.frequency, measurements.frequency).await?;

        if let Some(health) = health {
            if health != MeterHealthError::NoError {
                log::warn!("Meter health indicator raised: {}", health);
            }
            self.meter_health
                .set_value(DataObject::Unsigned8(health as u8))
                .await?;
        }
        if let Some(rssi) = measurements.signal_strength {
            self.signal_strength
                .set_value(DataObject::Integer32(rssi))
                .await?;
        }
        Ok(())
    }

    pub async fn meter_health(&self) -> DlmsResult<MeterHealthError> {
        let code = self.meter_health.value().await.as_i64()?;
        MeterHealthError::from_code(i32::try_from(code).unwrap_or(i32::MAX))
    }

    pub async fn signal_strength(&self) -> DlmsResult<i32> {
        let rssi = self.signal_strength.value().await.as_i64()?;
        i32::try_from(rssi).map_err(|_| DlmsError::InvalidData(format!("signal strength {}", rssi)))
    }

    /// Phase currents in amperes
    pub async fn currents(&self) -> DlmsResult<Vec<f64>> {
        scaled(&self.currents).await
    }

    /// Phase voltages in volts
    pub async fn voltages(&self) -> DlmsResult<Vec<f64>> {
        scaled(&self.voltages).await
    }

    /// Block energies: Wh import, VAh import, Wh export, VAh export
    pub async fn energies(&self) -> DlmsResult<Vec<f64>> {
        scaled(&self.energies).await
    }
}

/// Store a physical value, converting it to the register's integer steps
async fn set_scaled(register: &Register, value: Option<f64>) -> DlmsResult<()> {
    match value {
        Some(value) => {
            let raw = register.scaler_unit().await.unscale_value(value);
            register.set_reading(raw).await
        }
        None => Ok(()),
    }
}

async fn scaled(registers: &[Arc<Register>]) -> DlmsResult<Vec<f64>> {
    let mut values = Vec::with_capacity(registers.len());
    for register in registers {
        values.push(register.scaled_value().await?);
    }
    Ok(values)
}

#[async_trait]
impl CosemObject for BlockLoadProfile {
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
