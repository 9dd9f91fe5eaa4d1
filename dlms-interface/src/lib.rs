//! COSEM interface classes module for DLMS/COSEM protocol
//!
//! This crate provides the COSEM interface classes exposed by the simulated
//! meter and the registry that resolves them by logical name.
//!
//! ## 接口类
//! - Data 接口类（Class ID: 1）
//! - Register 接口类（Class ID: 3）
//! - Extended Register 接口类（Class ID: 4）
//! - Profile Generic 接口类（Class ID: 7），包括计费曲线和块负荷曲线
//! - Clock 接口类（Class ID: 8）
//! - Script Table 接口类（Class ID: 9）
//! - Association LN 接口类（Class ID: 15）
//! - Activity Calendar 接口类（Class ID: 20）
//! - Push Setup 接口类（Class ID: 40）
//! - Security Setup 接口类（Class ID: 64）
//!
//! ## 属性与方法
//! Every class describes its attributes and methods in an [`ObjectSchema`].
//! The provided [`CosemObject`] methods check ids and access modes against
//! the schema before the class specific handlers run.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::{units, CosemObject, ObjectRegistry, Register, ScalerUnit};
//! use dlms_core::{DataObjectType, ObisCode};
//! use std::sync::Arc;
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! let registry = ObjectRegistry::new();
//! let energy = Arc::new(Register::new(
//!     ObisCode::new(1, 0, 1, 8, 0, 255),
//!     DataObjectType::DoubleLongUnsigned,
//!     ScalerUnit::new(0, units::WATT_HOUR),
//! )?);
//! registry.register(energy.clone()).await?;
//!
//! let object = registry.resolve(Register::CLASS_ID, &ObisCode::new(1, 0, 1, 8, 0, 255)).await?;
//! let value = object.get_attribute(Register::ATTR_VALUE).await?;
//! # Ok(())
//! # }
//! ```

pub mod activity_calendar;
pub mod association_ln;
pub mod billing_profile;
pub mod block_load_profile;
pub mod clock;
pub mod data;
pub mod extended_register;
pub mod object;
pub mod profile_generic;
pub mod push_setup;
pub mod register;
pub mod registry;
pub mod scaler_unit;
pub mod script_table;
pub mod security_setup;

pub use activity_calendar::{
    ActivityCalendar, CalendarPlan, DayAction, DayProfile, SeasonProfile, WeekProfile,
};
pub use association_ln::{AssociationLn, AssociationStatus};
pub use billing_profile::{billing_status, BillingMeasurements, BillingProfile, BillingValues};
pub use block_load_profile::{BlockLoadMeasurements, BlockLoadProfile, MeterHealthError};
pub use clock::Clock;
pub use data::Data;
pub use extended_register::ExtendedRegister;
pub use object::{AttributeAccess, AttributeDescriptor, CosemObject, MethodDescriptor, ObjectSchema};
pub use profile_generic::{CaptureObject, ProfileEntry, ProfileGeneric, SortMethod};
pub use push_setup::{
    CommunicationWindow, LogPushTransport, MessageType, PushDestination, PushObject, PushSetup,
    PushTransport, TransportService,
};
pub use register::Register;
pub use registry::ObjectRegistry;
pub use scaler_unit::{units, ScalerUnit};
pub use script_table::{ScriptAction, ScriptActionType, ScriptTable};
pub use security_setup::{KeyAgreement, SecuritySetup, UnsupportedKeyAgreement};
