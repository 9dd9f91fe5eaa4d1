//! Clock interface class (Class ID: 8)
//!
//! The Clock interface class represents the real-time clock of the meter.
//! The clock runs: it is kept as an offset from the host clock, so adjusting
//! it moves every later reading by the same amount.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: time - Current local date and time
//! - Attribute 3: time_zone - Deviation of local time from UTC in minutes, [-720, 720]
//! - Attribute 4: status - Clock status bits
//! - Attribute 5: daylight_savings_begin - DST begin
//! - Attribute 6: daylight_savings_end - DST end
//! - Attribute 7: daylight_savings_deviation - DST deviation in minutes, [-120, 120]
//! - Attribute 8: daylight_savings_enabled - Whether DST is enabled
//! - Attribute 9: clock_base - Clock base identifier
//!
//! # Methods
//!
//! - Method 1: adjust_to_quarter - Round to the nearest quarter hour
//! - Method 2: adjust_to_measuring_period - Not implemented
//! - Method 3: adjust_to_minute - Round down to the minute
//! - Method 4: adjust_to_preset_time - Not implemented
//! - Method 5: preset_adjusting_time(date_time) - Set the clock
//! - Method 6: shift_time(seconds) - Move the clock by a number of seconds
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::Clock;
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! // Clock with the default OBIS (0-0:1.0.0.255), UTC+1
//! let clock = Clock::with_default_obis();
//! clock.set_time_zone(60).await?;
//! let now = clock.time().await;
//! # Ok(())
//! # }
//! ```

use crate::object::{required_parameter, AttributeAccess, CosemObject, ObjectSchema};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use tokio::sync::RwLock;

/// Clock status bits
pub mod status {
    pub const INVALID_VALUE: u8 = 0x01;
    pub const DOUBTFUL_VALUE: u8 = 0x02;
    pub const DIFFERENT_CLOCK_BASE: u8 = 0x04;
    pub const INVALID_CLOCK_STATUS: u8 = 0x08;
    pub const DAYLIGHT_SAVING_ACTIVE: u8 = 0x80;
}

/// Check whether `time` lies in the DST window `[begin, end]`.
///
/// A window with `begin > end` wraps around, e.g. it spans the year
/// boundary (or midnight when both ends are on the same day).
pub fn daylight_saving_active(begin: NaiveDateTime, end: NaiveDateTime, time: NaiveDateTime) -> bool {
    if begin <= end {
        time >= begin && time <= end
    } else {
        time >= begin || time <= end
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ClockState {
    /// Meter time minus host time
    offset: Duration,
    time_zone: i16,
    status: u8,
    daylight_savings_begin: NaiveDateTime,
    daylight_savings_end: NaiveDateTime,
    daylight_savings_deviation: i8,
    daylight_savings_enabled: bool,
    clock_base: u8,
}

impl ClockState {
    fn time_at(&self, host_now: NaiveDateTime) -> Option<NaiveDateTime> {
        host_now.checked_add_signed(self.offset)
    }

    fn update_status(&mut self, host_now: NaiveDateTime) {
        let mut status =
            self.status & !(status::INVALID_VALUE | status::DAYLIGHT_SAVING_ACTIVE);
        match self.time_at(host_now) {
            None => status |= status::INVALID_VALUE,
            Some(time) => {
                if self.daylight_savings_enabled
                    && daylight_saving_active(
                        self.daylight_savings_begin,
                        self.daylight_savings_end,
                        time,
                    )
                {
                    status |= status::DAYLIGHT_SAVING_ACTIVE;
                }
            }
        }
        self.status = status;
    }
}

/// Clock interface class (Class ID: 8)
///
/// Default OBIS: 0-0:1.0.0.255
#[derive(Debug)]
pub struct Clock {
    schema: ObjectSchema,
    state: RwLock<ClockState>,
}

impl Clock {
    pub const CLASS_ID: u16 = 8;

    /// Attribute IDs
    pub const ATTR_TIME: u8 = 2;
    pub const ATTR_TIME_ZONE: u8 = 3;
    pub const ATTR_STATUS: u8 = 4;
    pub const ATTR_DAYLIGHT_SAVINGS_BEGIN: u8 = 5;
    pub const ATTR_DAYLIGHT_SAVINGS_END: u8 = 6;
    pub const ATTR_DAYLIGHT_SAVINGS_DEVIATION: u8 = 7;
    pub const ATTR_DAYLIGHT_SAVINGS_ENABLED: u8 = 8;
    pub const ATTR_CLOCK_BASE: u8 = 9;

    /// Method IDs
    pub const METHOD_ADJUST_TO_QUARTER: u8 = 1;
    pub const METHOD_ADJUST_TO_MEASURING_PERIOD: u8 = 2;
    pub const METHOD_ADJUST_TO_MINUTE: u8 = 3;
    pub const METHOD_ADJUST_TO_PRESET_TIME: u8 = 4;
    pub const METHOD_PRESET_ADJUSTING_TIME: u8 = 5;
    pub const METHOD_SHIFT_TIME: u8 = 6;

    pub const DEFAULT_DAYLIGHT_SAVINGS_DEVIATION: i8 = 60;

    /// Default OBIS code for Clock (0-0:1.0.0.255)
    pub fn default_obis() -> ObisCode {
        ObisCode::new(0, 0, 1, 0, 0, 255)
    }

    /// Create a clock that follows the host clock, in UTC, without DST
    pub fn new(logical_name: ObisCode) -> Self {
        let host_now = host_now();
        let schema = ObjectSchema::new(Self::CLASS_ID, logical_name)
            .with_attribute(Self::ATTR_TIME, "time", DataObjectType::DateTime, AttributeAccess::ReadWrite)
            .with_attribute(
                Self::ATTR_TIME_ZONE,
                "time_zone",
                DataObjectType::LongInteger,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(Self::ATTR_STATUS, "status", DataObjectType::Unsigned, AttributeAccess::ReadWrite)
            .with_attribute(
                Self::ATTR_DAYLIGHT_SAVINGS_BEGIN,
                "daylight_savings_begin",
                DataObjectType::DateTime,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_DAYLIGHT_SAVINGS_END,
                "daylight_savings_end",
                DataObjectType::DateTime,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_DAYLIGHT_SAVINGS_DEVIATION,
                "daylight_savings_deviation",
                DataObjectType::Integer,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_DAYLIGHT_SAVINGS_ENABLED,
                "daylight_savings_enabled",
                DataObjectType::Boolean,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_CLOCK_BASE,
                "clock_base",
                DataObjectType::Enumerate,
                AttributeAccess::ReadWrite,
            )
            .with_method(Self::METHOD_ADJUST_TO_QUARTER, "adjust_to_quarter")
            .with_method(Self::METHOD_ADJUST_TO_MEASURING_PERIOD, "adjust_to_measuring_period")
            .with_method(Self::METHOD_ADJUST_TO_MINUTE, "adjust_to_minute")
            .with_method(Self::METHOD_ADJUST_TO_PRESET_TIME, "adjust_to_preset_time")
            .with_method(Self::METHOD_PRESET_ADJUSTING_TIME, "preset_adjusting_time")
            .with_method(Self::METHOD_SHIFT_TIME, "shift_time");

        let mut state = ClockState {
            offset: Duration::zero(),
            time_zone: 0,
            status: 0,
            daylight_savings_begin: host_now,
            daylight_savings_end: host_now,
            daylight_savings_deviation: Self::DEFAULT_DAYLIGHT_SAVINGS_DEVIATION,
            daylight_savings_enabled: false,
            clock_base: 0,
        };
        state.update_status(host_now);
        Self {
            schema,
            state: RwLock::new(state),
        }
    }

    pub fn with_default_obis() -> Self {
        Self::new(Self::default_obis())
    }

    /// Current meter time
    pub async fn time(&self) -> NaiveDateTime {
        self.time_at(host_now()).await
    }

    /// Meter time when the host clock reads `host_now`
    pub async fn time_at(&self, host_now: NaiveDateTime) -> NaiveDateTime {
        self.state.read().await.time_at(host_now).unwrap_or(host_now)
    }

    pub async fn set_time(&self, time: NaiveDateTime) {
        self.set_time_at(time, host_now()).await;
    }

    /// Set the meter time to `time` at host time `host_now`
    pub async fn set_time_at(&self, time: NaiveDateTime, host_now: NaiveDateTime) {
        let mut state = self.state.write().await;
        state.offset = time - host_now;
        state.update_status(host_now);
        log::debug!("{} set to {}", self.schema.logical_name(), time);
    }

    /// Move the meter time by `seconds`
    pub async fn shift_time(&self, seconds: i64) -> DlmsResult<()> {
        let shift = Duration::try_seconds(seconds)
            .ok_or_else(|| DlmsError::RangeViolation(format!("shift of {} s", seconds)))?;
        let host_now = host_now();
        let mut state = self.state.write().await;
        state.offset = state
            .offset
            .checked_add(&shift)
            .ok_or_else(|| DlmsError::RangeViolation(format!("shift of {} s", seconds)))?;
        state.update_status(host_now);
        Ok(())
    }

    /// Round the meter time to the nearest quarter hour, seconds zeroed
    pub async fn adjust_to_quarter_at(&self, host_now: NaiveDateTime) {
        self.adjust_at(host_now, |time| {
            let quarters = (f64::from(time.minute()) / 15.0).round() as i64;
            truncate_to_hour(time) + Duration::minutes(quarters * 15)
        })
        .await;
    }

    /// Zero the seconds of the meter time
    pub async fn adjust_to_minute_at(&self, host_now: NaiveDateTime) {
        self.adjust_at(host_now, |time| {
            truncate_to_hour(time) + Duration::minutes(i64::from(time.minute()))
        })
        .await;
    }

    /// Read, transform and store the meter time under one write guard
    async fn adjust_at(
        &self,
        host_now: NaiveDateTime,
        adjust: impl FnOnce(NaiveDateTime) -> NaiveDateTime,
    ) {
        let mut state = self.state.write().await;
        let time = adjust(state.time_at(host_now).unwrap_or(host_now));
        state.offset = time - host_now;
        state.update_status(host_now);
        log::debug!("{} adjusted to {}", self.schema.logical_name(), time);
    }

    pub async fn time_zone(&self) -> i16 {
        self.state.read().await.time_zone
    }

    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] outside [-720, 720] minutes.
    pub async fn set_time_zone(&self, time_zone: i16) -> DlmsResult<()> {
        if !(-720..=720).contains(&time_zone) {
            return Err(DlmsError::RangeViolation(format!(
                "time zone {} not in -720..=720 minutes",
                time_zone
            )));
        }
        self.state.write().await.time_zone = time_zone;
        Ok(())
    }

    /// Status byte, recomputed for the current meter time
    pub async fn status(&self) -> u8 {
        self.status_at(host_now()).await
    }

    pub async fn status_at(&self, host_now: NaiveDateTime) -> u8 {
        let mut state = self.state.write().await;
        state.update_status(host_now);
        state.status
    }

    /// Set the status byte; the computed bits are refreshed right after
    pub async fn set_status(&self, status: u8) {
        let host_now = host_now();
        let mut state = self.state.write().await;
        state.status = status;
        state.update_status(host_now);
    }

    /// Configure the DST window and deviation
    ///
    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] if the deviation is outside [-120, 120].
    pub async fn set_daylight_savings(
        &self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
        deviation: i8,
        enabled: bool,
    ) -> DlmsResult<()> {
        check_deviation(deviation)?;
        let host_now = host_now();
        let mut state = self.state.write().await;
        state.daylight_savings_begin = begin;
        state.daylight_savings_end = end;
        state.daylight_savings_deviation = deviation;
        state.daylight_savings_enabled = enabled;
        state.update_status(host_now);
        Ok(())
    }

    pub async fn daylight_savings_enabled(&self) -> bool {
        self.state.read().await.daylight_savings_enabled
    }

    pub async fn clock_base(&self) -> u8 {
        self.state.read().await.clock_base
    }

    async fn update<F>(&self, apply: F) -> DlmsResult<()>
    where
        F: FnOnce(&mut ClockState) -> DlmsResult<()> + Send,
    {
        let host_now = host_now();
        let mut state = self.state.write().await;
        apply(&mut state)?;
        state.update_status(host_now);
        Ok(())
    }
}

fn host_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn truncate_to_hour(time: NaiveDateTime) -> NaiveDateTime {
    time - Duration::minutes(i64::from(time.minute()))
        - Duration::seconds(i64::from(time.second()))
        - Duration::nanoseconds(i64::from(time.nanosecond()))
}

fn check_deviation(deviation: i8) -> DlmsResult<()> {
    if !(-120..=120).contains(&deviation) {
        return Err(DlmsError::RangeViolation(format!(
            "daylight savings deviation {} not in -120..=120 minutes",
            deviation
        )));
    }
    Ok(())
}

fn integer<T: TryFrom<i64>>(value: &DataObject, what: &str) -> DlmsResult<T> {
    T::try_from(value.as_i64()?)
        .map_err(|_| DlmsError::RangeViolation(format!("{} {} out of range", what, value)))
}

#[async_trait]
impl CosemObject for Clock {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        let host_now = host_now();
        let mut state = self.state.write().await;
        state.update_status(host_now);
        let value = match attribute_id {
            Self::ATTR_TIME => DataObject::DateTime(state.time_at(host_now).unwrap_or(host_now)),
            Self::ATTR_TIME_ZONE => DataObject::Integer16(state.time_zone),
            Self::ATTR_STATUS => DataObject::Unsigned8(state.status),
            Self::ATTR_DAYLIGHT_SAVINGS_BEGIN => DataObject::DateTime(state.daylight_savings_begin),
            Self::ATTR_DAYLIGHT_SAVINGS_END => DataObject::DateTime(state.daylight_savings_end),
            Self::ATTR_DAYLIGHT_SAVINGS_DEVIATION => {
                DataObject::Integer8(state.daylight_savings_deviation)
            }
            Self::ATTR_DAYLIGHT_SAVINGS_ENABLED => {
                DataObject::Boolean(state.daylight_savings_enabled)
            }
            Self::ATTR_CLOCK_BASE => DataObject::Enumerate(state.clock_base),
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        };
        Ok(value)
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_TIME => {
                self.set_time(value.as_date_time()?).await;
                Ok(())
            }
            Self::ATTR_TIME_ZONE => self.set_time_zone(integer(&value, "time zone")?).await,
            Self::ATTR_STATUS => {
                self.set_status(integer(&value, "status")?).await;
                Ok(())
            }
            Self::ATTR_DAYLIGHT_SAVINGS_BEGIN => {
                let begin = value.as_date_time()?;
                self.update(|state| {
                    state.daylight_savings_begin = begin;
                    Ok(())
                })
                .await
            }
            Self::ATTR_DAYLIGHT_SAVINGS_END => {
                let end = value.as_date_time()?;
                self.update(|state| {
                    state.daylight_savings_end = end;
                    Ok(())
                })
                .await
            }
            Self::ATTR_DAYLIGHT_SAVINGS_DEVIATION => {
                let deviation: i8 = integer(&value, "daylight savings deviation")?;
                check_deviation(deviation)?;
                self.update(|state| {
                    state.daylight_savings_deviation = deviation;
                    Ok(())
                })
                .await
            }
            Self::ATTR_DAYLIGHT_SAVINGS_ENABLED => {
                let enabled = value.as_bool()?;
                self.update(|state| {
                    state.daylight_savings_enabled = enabled;
                    Ok(())
                })
                .await
            }
            Self::ATTR_CLOCK_BASE => {
                let clock_base: u8 = integer(&value, "clock base")?;
                self.update(|state| {
                    state.clock_base = clock_base;
                    Ok(())
                })
                .await
            }
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_action(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_ADJUST_TO_QUARTER => self.adjust_to_quarter_at(host_now()).await,
            Self::METHOD_ADJUST_TO_MINUTE => self.adjust_to_minute_at(host_now()).await,
            Self::METHOD_ADJUST_TO_MEASURING_PERIOD | Self::METHOD_ADJUST_TO_PRESET_TIME => {
                return Err(DlmsError::NotImplemented(format!(
                    "clock method {}",
                    method_id
                )));
            }
            Self::METHOD_PRESET_ADJUSTING_TIME => {
                let time = required_parameter(method_id, parameters)?.as_date_time()?;
                self.set_time(time).await;
            }
            Self::METHOD_SHIFT_TIME => {
                let seconds = required_parameter(method_id, parameters)?.as_i64()?;
                self.shift_time(seconds).await?;
            }
            _ => return Err(self.schema.invalid_method(method_id)),
        }
        Ok(None)
    }
}
