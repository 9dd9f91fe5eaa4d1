//! Activity Calendar interface class (Class ID: 20)
//!
//! The activity calendar drives tariff switching. It keeps an active plan
//! and a passive plan; the passive plan is edited freely and becomes active
//! when `activate_passive_calendar` runs or its activation time passes.
//!
//! A plan is made of season profiles (which week profile applies from a
//! start date), week profiles (which day profile applies on each weekday)
//! and day profiles (which script runs from a time of day).
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: calendar_name - Name of the passive plan
//! - Attribute 3: season_profile_passive - Array of `{name, start, week_name}`
//! - Attribute 4: week_profile_table_passive - Array of `{name, monday..sunday}`
//! - Attribute 5: day_profile_table_passive - Array of `{day_id, array of {start_time, script, selector}}`
//! - Attribute 6: season_profile_active (read-only)
//! - Attribute 7: week_profile_table_active (read-only)
//! - Attribute 8: day_profile_table_active (read-only)
//! - Attribute 9: activate_passive_calendar_time - Pending activation, null if none
//!
//! # Methods
//!
//! - Method 1: activate_passive_calendar - Swap the passive and active plans

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, NaiveTime};
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonProfile {
    pub name: String,
    pub start: NaiveDateTime,
    pub week_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekProfile {
    pub name: String,
    /// Day profile id per weekday, Monday first
    pub days: [u8; 7],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAction {
    pub start_time: NaiveTime,
    pub script_logical_name: ObisCode,
    pub script_selector: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayProfile {
    pub day_id: u8,
    pub actions: Vec<DayAction>,
}

/// One complete calendar
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CalendarPlan {
    pub name: String,
    pub seasons: Vec<SeasonProfile>,
    pub weeks: Vec<WeekProfile>,
    pub days: Vec<DayProfile>,
}

impl CalendarPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Check that every season refers to an existing week profile
    pub fn validate(&self) -> DlmsResult<()> {
        for season in &self.seasons {
            if !self.weeks.iter().any(|week| week.name == season.week_name) {
                return Err(DlmsError::InvalidData(format!(
                    "season '{}' refers to unknown week profile '{}'",
                    season.name, season.week_name
                )));
            }
        }
        Ok(())
    }

    /// The season with the latest start not after `now`
    pub fn season_at(&self, now: NaiveDateTime) -> Option<&SeasonProfile> {
        self.seasons
            .iter()
            .filter(|season| season.start <= now)
            .max_by_key(|season| season.start)
    }

    pub fn day_profile_at(&self, now: NaiveDateTime) -> Option<&DayProfile> {
        let season = self.season_at(now)?;
        let week = self.weeks.iter().find(|week| week.name == season.week_name)?;
        let day_id = week.days[now.weekday().num_days_from_monday() as usize];
        self.days.iter().find(|day| day.day_id == day_id)
    }

    /// Actions of today's day profile that have started, in start order
    pub fn actions_at(&self, now: NaiveDateTime) -> Vec<DayAction> {
        let mut actions: Vec<DayAction> = self
            .day_profile_at(now)
            .map(|day| {
                day.actions
                    .iter()
                    .filter(|action| action.start_time <= now.time())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        actions.sort_by_key(|action| action.start_time);
        actions
    }

    fn seasons_data_object(&self) -> DataObject {
        DataObject::Array(
            self.seasons
                .iter()
                .map(|season| {
                    DataObject::Structure(vec![
                        DataObject::OctetString(season.name.as_bytes().to_vec()),
                        DataObject::DateTime(season.start),
                        DataObject::OctetString(season.week_name.as_bytes().to_vec()),
                    ])
                })
                .collect(),
        )
    }

    fn weeks_data_object(&self) -> DataObject {
        DataObject::Array(
            self.weeks
                .iter()
                .map(|week| {
                    let mut fields = vec![DataObject::OctetString(week.name.as_bytes().to_vec())];
                    fields.extend(week.days.iter().map(|day| DataObject::Unsigned8(*day)));
                    DataObject::Structure(fields)
                })
                .collect(),
        )
    }

    fn days_data_object(&self) -> DataObject {
        DataObject::Array(
            self.days
                .iter()
                .map(|day| {
                    DataObject::Structure(vec![
                        DataObject::Unsigned8(day.day_id),
                        DataObject::Array(
                            day.actions
                                .iter()
                                .map(|action| {
                                    DataObject::Structure(vec![
                                        DataObject::Time(action.start_time),
                                        DataObject::OctetString(
                                            action.script_logical_name.to_bytes().to_vec(),
                                        ),
                                        DataObject::Unsigned16(action.script_selector),
                                    ])
                                })
                                .collect(),
                        ),
                    ])
                })
                .collect(),
        )
    }
}

fn name(value: &DataObject) -> DlmsResult<String> {
    match value {
        DataObject::OctetString(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| DlmsError::TypeMismatch("profile name is not UTF-8".to_string())),
        other => Ok(other.as_str()?.to_string()),
    }
}

fn narrow<T: TryFrom<i64>>(value: &DataObject) -> DlmsResult<T> {
    T::try_from(value.as_i64()?)
        .map_err(|_| DlmsError::RangeViolation(format!("{} out of range", value)))
}

fn parse_seasons(value: &DataObject) -> DlmsResult<Vec<SeasonProfile>> {
    value
        .as_array()?
        .iter()
        .map(|season| {
            let fields = season.as_structure_of(3)?;
            Ok(SeasonProfile {
                name: name(&fields[0])?,
                start: fields[1].as_date_time()?,
                week_name: name(&fields[2])?,
            })
        })
        .collect()
}

fn parse_weeks(value: &DataObject) -> DlmsResult<Vec<WeekProfile>> {
    value
        .as_array()?
        .iter()
        .map(|week| {
            // a name and all seven weekdays
            let fields = week.as_structure_of(8)?;
            let mut days = [0u8; 7];
            for (day, field) in days.iter_mut().zip(&fields[1..]) {
                *day = narrow(field)?;
            }
            Ok(WeekProfile {
                name: name(&fields[0])?,
                days,
            })
        })
        .collect()
}

fn parse_days(value: &DataObject) -> DlmsResult<Vec<DayProfile>> {
    value
        .as_array()?
        .iter()
        .map(|day| {
            let fields = day.as_structure_of(2)?;
            let actions = fields[1]
                .as_array()?
                .iter()
                .map(|action| {
                    let fields = action.as_structure_of(3)?;
                    Ok(DayAction {
                        start_time: fields[0].as_time()?,
                        script_logical_name: ObisCode::from_bytes(fields[1].as_octet_string()?)?,
                        script_selector: narrow(&fields[2])?,
                    })
                })
                .collect::<DlmsResult<Vec<_>>>()?;
            Ok(DayProfile {
                day_id: narrow(&fields[0])?,
                actions,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default)]
struct CalendarState {
    active: CalendarPlan,
    passive: CalendarPlan,
    activation_time: Option<NaiveDateTime>,
}

/// Activity Calendar interface class (Class ID: 20)
///
/// Default OBIS: 0-0:13.0.0.255
#[derive(Debug)]
pub struct ActivityCalendar {
    schema: ObjectSchema,
    state: RwLock<CalendarState>,
}

impl ActivityCalendar {
    pub const CLASS_ID: u16 = 20;

    /// Attribute IDs
    pub const ATTR_CALENDAR_NAME: u8 = 2;
    pub const ATTR_SEASON_PROFILE_PASSIVE: u8 = 3;
    pub const ATTR_WEEK_PROFILE_TABLE_PASSIVE: u8 = 4;
    pub const ATTR_DAY_PROFILE_TABLE_PASSIVE: u8 = 5;
    pub const ATTR_SEASON_PROFILE_ACTIVE: u8 = 6;
    pub const ATTR_WEEK_PROFILE_TABLE_ACTIVE: u8 = 7;
    pub const ATTR_DAY_PROFILE_TABLE_ACTIVE: u8 = 8;
    pub const ATTR_ACTIVATE_PASSIVE_CALENDAR_TIME: u8 = 9;

    /// Method IDs
    pub const METHOD_ACTIVATE_PASSIVE_CALENDAR: u8 = 1;

    pub fn default_obis() -> ObisCode {
        ObisCode::new(0, 0, 13, 0, 0, 255)
    }

    pub fn new(logical_name: ObisCode) -> Self {
        let read_write = AttributeAccess::ReadWrite;
        let read_only = AttributeAccess::ReadOnly;
        let schema = ObjectSchema::new(Self::CLASS_ID, logical_name)
            .with_attribute(Self::ATTR_CALENDAR_NAME, "calendar_name", DataObjectType::OctetString, read_write)
            .with_attribute(Self::ATTR_SEASON_PROFILE_PASSIVE, "season_profile_passive", DataObjectType::Array, read_write)
            .with_attribute(
                Self::ATTR_WEEK_PROFILE_TABLE_PASSIVE,
                "week_profile_table_passive",
                DataObjectType::Array,
                read_write,
            )
            .with_attribute(
                Self::ATTR_DAY_PROFILE_TABLE_PASSIVE,
                "day_profile_table_passive",
                DataObjectType::Array,
                read_write,
            )
            .with_attribute(Self::ATTR_SEASON_PROFILE_ACTIVE, "season_profile_active", DataObjectType::Array, read_only)
            .with_attribute(
                Self::ATTR_WEEK_PROFILE_TABLE_ACTIVE,
                "week_profile_table_active",
                DataObjectType::Array,
                read_only,
            )
            .with_attribute(
                Self::ATTR_DAY_PROFILE_TABLE_ACTIVE,
                "day_profile_table_active",
                DataObjectType::Array,
                read_only,
            )
            .with_attribute(
                Self::ATTR_ACTIVATE_PASSIVE_CALENDAR_TIME,
                "activate_passive_calendar_time",
                DataObjectType::DateTime,
                read_write,
            )
            .with_method(Self::METHOD_ACTIVATE_PASSIVE_CALENDAR, "activate_passive_calendar");
        Self {
            schema,
            state: RwLock::new(CalendarState::default()),
        }
    }

    pub async fn active_plan(&self) -> CalendarPlan {
        self.state.read().await.active.clone()
    }

    pub async fn passive_plan(&self) -> CalendarPlan {
        self.state.read().await.passive.clone()
    }

    /// Replace the passive plan after validating it
    pub async fn set_passive_plan(&self, plan: CalendarPlan) -> DlmsResult<()> {
        plan.validate()?;
        self.state.write().await.passive = plan;
        Ok(())
    }

    pub async fn activation_time(&self) -> Option<NaiveDateTime> {
        self.state.read().await.activation_time
    }

    pub async fn set_activation_time(&self, activation_time: Option<NaiveDateTime>) {
        self.state.write().await.activation_time = activation_time;
    }

    /// Swap the active and passive plans and clear the pending activation
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::InvalidData`] if the passive plan is inconsistent;
    /// nothing changes in that case.
    pub async fn activate_passive_calendar(&self) -> DlmsResult<()> {
        let mut state = self.state.write().await;
        state.passive.validate()?;
        let state = &mut *state;
        std::mem::swap(&mut state.active, &mut state.passive);
        state.activation_time = None;
        log::info!(
            "{} activated calendar '{}'",
            self.schema.logical_name(),
            state.active.name
        );
        Ok(())
    }

    /// Activate the passive plan if its activation time has passed.
    /// Returns whether an activation happened.
    pub async fn check_activation(&self, now: NaiveDateTime) -> DlmsResult<bool> {
        let due = matches!(self.activation_time().await, Some(at) if at <= now);
        if due {
            self.activate_passive_calendar().await?;
        }
        Ok(due)
    }

    pub async fn current_season_at(&self, now: NaiveDateTime) -> Option<SeasonProfile> {
        self.state.read().await.active.season_at(now).cloned()
    }

    pub async fn current_day_profile_at(&self, now: NaiveDateTime) -> Option<DayProfile> {
        self.state.read().await.active.day_profile_at(now).cloned()
    }

    pub async fn current_actions_at(&self, now: NaiveDateTime) -> Vec<DayAction> {
        self.state.read().await.active.actions_at(now)
    }

    /// Script selector of the latest started action, i.e. the current tariff
    pub async fn current_script_selector_at(&self, now: NaiveDateTime) -> Option<u16> {
        self.current_actions_at(now)
            .await
            .last()
            .map(|action| action.script_selector)
    }
}

#[async_trait]
impl CosemObject for ActivityCalendar {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        let state = self.state.read().await;
        let value = match attribute_id {
            Self::ATTR_CALENDAR_NAME => DataObject::OctetString(state.passive.name.as_bytes().to_vec()),
            Self::ATTR_SEASON_PROFILE_PASSIVE => state.passive.seasons_data_object(),
            Self::ATTR_WEEK_PROFILE_TABLE_PASSIVE => state.passive.weeks_data_object(),
            Self::ATTR_DAY_PROFILE_TABLE_PASSIVE => state.passive.days_data_object(),
            Self::ATTR_SEASON_PROFILE_ACTIVE => state.active.seasons_data_object(),
            Self::ATTR_WEEK_PROFILE_TABLE_ACTIVE => state.active.weeks_data_object(),
            Self::ATTR_DAY_PROFILE_TABLE_ACTIVE => state.active.days_data_object(),
            Self::ATTR_ACTIVATE_PASSIVE_CALENDAR_TIME => state
                .activation_time
                .map_or(DataObject::Null, DataObject::DateTime),
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        };
        Ok(value)
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_CALENDAR_NAME => {
                let calendar_name = name(&value)?;
                self.state.write().await.passive.name = calendar_name;
            }
            Self::ATTR_SEASON_PROFILE_PASSIVE => {
                let seasons = parse_seasons(&value)?;
                self.state.write().await.passive.seasons = seasons;
            }
            Self::ATTR_WEEK_PROFILE_TABLE_PASSIVE => {
                let weeks = parse_weeks(&value)?;
                self.state.write().await.passive.weeks = weeks;
            }
            Self::ATTR_DAY_PROFILE_TABLE_PASSIVE => {
                let days = parse_days(&value)?;
                self.state.write().await.passive.days = days;
            }
            Self::ATTR_ACTIVATE_PASSIVE_CALENDAR_TIME => {
                let activation_time = match value {
                    DataObject::Null => None,
                    other => Some(other.as_date_time()?),
                };
                self.set_activation_time(activation_time).await;
            }
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        }
        Ok(())
    }

    async fn handle_action(
        &self,
        method_id: u8,
        _parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_ACTIVATE_PASSIVE_CALENDAR => {
                self.activate_passive_calendar().await?;
                Ok(None)
            }
            _ => Err(self.schema.invalid_method(method_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const TARIFF_SCRIPTS: ObisCode = ObisCode::new(0, 0, 10, 0, 100, 255);

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn action(h: u32, selector: u16) -> DayAction {
        DayAction {
            start_time: time(h, 0),
            script_logical_name: TARIFF_SCRIPTS,
            script_selector: selector,
        }
    }

    fn two_season_plan() -> CalendarPlan {
        CalendarPlan {
            name: "TOU-2024".to_string(),
            seasons: vec![
                SeasonProfile {
                    name: "winter".to_string(),
                    start: date(2024, 1, 1),
                    week_name: "winter-week".to_string(),
                },
                SeasonProfile {
                    name: "summer".to_string(),
                    start: date(2024, 6, 1),
                    week_name: "summer-week".to_string(),
                },
            ],
            weeks: vec![
                WeekProfile {
                    name: "winter-week".to_string(),
                    days: [1, 1, 1, 1, 1, 2, 2],
                },
                WeekProfile {
                    name: "summer-week".to_string(),
                    days: [3, 3, 3, 3, 3, 2, 2],
                },
            ],
            days: vec![
                DayProfile {
                    day_id: 1,
                    actions: vec![action(0, 1), action(6, 2), action(22, 1)],
                },
                DayProfile {
                    day_id: 2,
                    actions: vec![action(0, 3)],
                },
                DayProfile {
                    day_id: 3,
                    actions: vec![action(18, 2), action(0, 1)],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_activity_calendar_class_id() {
        let calendar = ActivityCalendar::new(ActivityCalendar::default_obis());
        assert_eq!(calendar.class_id(), 20);
    }

    #[tokio::test]
    async fn test_activate_swaps_plans_and_clears_activation_time() {
        let calendar = ActivityCalendar::new(ActivityCalendar::default_obis());
        let old_active = calendar.active_plan().await;
        let plan = two_season_plan();
        calendar.set_passive_plan(plan.clone()).await.unwrap();
        calendar.set_activation_time(Some(date(2030, 1, 1))).await;

        calendar.invoke_method(1, None).await.unwrap();

        assert_eq!(calendar.active_plan().await, plan);
        assert_eq!(calendar.passive_plan().await, old_active);
        assert_eq!(calendar.activation_time().await, None);
    }

    #[tokio::test]
    async fn test_season_and_day_resolution() {
        let calendar = ActivityCalendar::new(ActivityCalendar::default_obis());
        calendar.set_passive_plan(two_season_plan()).await.unwrap();
        calendar.activate_passive_calendar().await.unwrap();

        // 2024-03-06 is a Wednesday
        let winter_weekday = date(2024, 3, 6) + chrono::Duration::hours(7);
        assert_eq!(calendar.current_season_at(winter_weekday).await.unwrap().name, "winter");
        assert_eq!(calendar.current_day_profile_at(winter_weekday).await.unwrap().day_id, 1);
        assert_eq!(calendar.current_actions_at(winter_weekday).await.len(), 2);
        assert_eq!(calendar.current_script_selector_at(winter_weekday).await, Some(2));

        // 2024-07-06 is a Saturday
        let summer_saturday = date(2024, 7, 6) + chrono::Duration::hours(19);
        assert_eq!(calendar.current_season_at(summer_saturday).await.unwrap().name, "summer");
        assert_eq!(calendar.current_day_profile_at(summer_saturday).await.unwrap().day_id, 2);

        // summer weekday actions come back sorted by start time
        let summer_weekday = date(2024, 7, 8) + chrono::Duration::hours(19);
        let actions = calendar.current_actions_at(summer_weekday).await;
        assert_eq!(actions[0].start_time, time(0, 0));
        assert_eq!(calendar.current_script_selector_at(summer_weekday).await, Some(2));

        assert!(calendar.current_season_at(date(2023, 12, 31)).await.is_none());
    }

    #[tokio::test]
    async fn test_validation_rejects_unknown_week() {
        let calendar = ActivityCalendar::new(ActivityCalendar::default_obis());
        let mut plan = two_season_plan();
        plan.seasons[1].week_name = "missing".to_string();
        assert!(matches!(
            calendar.set_passive_plan(plan).await,
            Err(DlmsError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_check_activation() {
        let calendar = ActivityCalendar::new(ActivityCalendar::default_obis());
        calendar.set_passive_plan(two_season_plan()).await.unwrap();
        calendar
            .set_attribute(9, DataObject::DateTime(date(2024, 5, 1)))
            .await
            .unwrap();

        assert!(!calendar.check_activation(date(2024, 4, 30)).await.unwrap());
        assert_eq!(calendar.active_plan().await.name, "");
        assert!(calendar.check_activation(date(2024, 5, 1)).await.unwrap());
        assert_eq!(calendar.active_plan().await.name, "TOU-2024");
        assert_eq!(calendar.get_attribute(9).await.unwrap(), DataObject::Null);
    }

    #[tokio::test]
    async fn test_passive_tables_through_attributes() {
        let source = ActivityCalendar::new(ActivityCalendar::default_obis());
        source.set_passive_plan(two_season_plan()).await.unwrap();

        let target = ActivityCalendar::new(ActivityCalendar::default_obis());
        for attribute_id in 2..=5 {
            let value = source.get_attribute(attribute_id).await.unwrap();
            target.set_attribute(attribute_id, value).await.unwrap();
        }
        assert_eq!(target.passive_plan().await, two_season_plan());

        assert_eq!(
            target.set_attribute(6, DataObject::Array(vec![])).await,
            Err(DlmsError::ReadOnlyViolation(6))
        );
    }
}
