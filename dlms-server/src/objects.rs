//! Standard object set of the simulated logical device
//!
//! | Object | Class | Logical name |
//! |--------|-------|--------------|
//! | Clock | 8 | 0.0.1.0.0.255 |
//! | Logical device name | 1 | 0.0.42.0.0.255 |
//! | Active / apparent energy import | 3 | 1.0.1.8.0.255, 1.0.9.8.0.255 |
//! | Instantaneous voltage, current, power, frequency | 3 | 1.0.32.7.0.255, 1.0.31.7.0.255, 1.0.1.7.0.255, 1.0.14.7.0.255 |
//! | Billing profile and its registers | 7 | 1.0.98.1.0.255 |
//! | Block load profile and its registers | 7 | 1.0.99.1.0.255 |
//! | Push setup | 40 | 0.4.25.9.0.255 |
//! | Security setup | 64 | 0.0.43.0.0.255 |
//! | Script table | 9 | 0.0.10.0.100.255 |
//! | Activity calendar | 20 | 0.0.13.0.0.255 |

use crate::server::ServerConfig;
use dlms_core::{DataObject, DataObjectType, DlmsResult, ObisCode};
use dlms_interface::{
    units, ActivityCalendar, AttributeAccess, BillingProfile, BlockLoadProfile, Clock,
    CosemObject, Data, ObjectRegistry, ProfileGeneric, PushDestination, PushObject, PushSetup,
    PushTransport, Register, ScalerUnit, ScriptAction, ScriptTable, SecuritySetup,
    TransportService,
};
use dlms_security::{KeyManager, SecurityAuditLog};
use std::sync::Arc;

/// Script that captures the billing profile
pub const SCRIPT_CAPTURE_BILLING: u16 = 1;
/// Script that captures the block load profile
pub const SCRIPT_CAPTURE_BLOCK_LOAD: u16 = 2;

pub fn logical_device_name_obis() -> ObisCode {
    ObisCode::new(0, 0, 42, 0, 0, 255)
}

pub fn active_energy_import_obis() -> ObisCode {
    ObisCode::new(1, 0, 1, 8, 0, 255)
}

pub fn apparent_energy_import_obis() -> ObisCode {
    ObisCode::new(1, 0, 9, 8, 0, 255)
}

pub fn voltage_obis() -> ObisCode {
    ObisCode::new(1, 0, 32, 7, 0, 255)
}

pub fn current_obis() -> ObisCode {
    ObisCode::new(1, 0, 31, 7, 0, 255)
}

pub fn active_power_obis() -> ObisCode {
    ObisCode::new(1, 0, 1, 7, 0, 255)
}

pub fn frequency_obis() -> ObisCode {
    ObisCode::new(1, 0, 14, 7, 0, 255)
}

/// Handles to the objects installed by [`StandardObjects::install`]
pub struct StandardObjects {
    pub clock: Arc<Clock>,
    pub logical_device_name: Arc<Data>,
    pub active_energy_import: Arc<Register>,
    pub apparent_energy_import: Arc<Register>,
    pub voltage: Arc<Register>,
    pub current: Arc<Register>,
    pub active_power: Arc<Register>,
    pub frequency: Arc<Register>,
    pub billing: Arc<BillingProfile>,
    pub block_load: Arc<BlockLoadProfile>,
    pub push: Arc<PushSetup>,
    pub security: Arc<SecuritySetup>,
    pub scripts: Arc<ScriptTable>,
    pub calendar: Arc<ActivityCalendar>,
}

impl StandardObjects {
    /// Build the standard objects and register all of them with `registry`
    pub async fn install(
        registry: &Arc<ObjectRegistry>,
        config: &ServerConfig,
        keys: Arc<KeyManager>,
        audit: Arc<SecurityAuditLog>,
        push_transport: Arc<dyn PushTransport>,
    ) -> DlmsResult<Self> {
        let register = |obis, value_type, scaler, unit| -> DlmsResult<Arc<Register>> {
            Ok(Arc::new(Register::new(obis, value_type, ScalerUnit::new(scaler, unit))?))
        };

        let objects = Self {
            clock: Arc::new(Clock::with_default_obis()),
            logical_device_name: Arc::new(Data::with_access(
                logical_device_name_obis(),
                DataObjectType::OctetString,
                DataObject::OctetString(config.logical_device_name.as_bytes().to_vec()),
                AttributeAccess::ReadOnly,
            )?),
            active_energy_import: register(
                active_energy_import_obis(),
                DataObjectType::DoubleLongUnsigned,
                0,
                units::WATT_HOUR,
            )?,
            apparent_energy_import: register(
                apparent_energy_import_obis(),
                DataObjectType::DoubleLongUnsigned,
                0,
                units::VOLT_AMPERE_HOUR,
            )?,
            voltage: register(voltage_obis(), DataObjectType::LongUnsigned, -1, units::VOLT)?,
            current: register(current_obis(), DataObjectType::LongUnsigned, -2, units::AMPERE)?,
            active_power: register(active_power_obis(), DataObjectType::DoubleLong, 0, units::WATT)?,
            frequency: register(frequency_obis(), DataObjectType::LongUnsigned, -2, units::HERTZ)?,
            billing: Arc::new(BillingProfile::new(Arc::downgrade(registry)).await?),
            block_load: Arc::new(
                BlockLoadProfile::new(config.block_load_period, Arc::downgrade(registry)).await?,
            ),
            push: Arc::new(PushSetup::new(
                PushSetup::default_obis(),
                Arc::downgrade(registry),
                push_transport,
            )),
            security: Arc::new(SecuritySetup::new(
                SecuritySetup::default_obis(),
                config.system_title,
                keys,
                audit,
            )),
            scripts: Arc::new(ScriptTable::new(
                ScriptTable::default_obis(),
                Arc::downgrade(registry),
            )),
            calendar: Arc::new(ActivityCalendar::new(ActivityCalendar::default_obis())),
        };

        objects
            .push
            .set_push_objects(vec![
                PushObject::new(Data::CLASS_ID, logical_device_name_obis(), Data::ATTR_VALUE),
                PushObject::new(Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME),
                PushObject::new(
                    Register::CLASS_ID,
                    active_energy_import_obis(),
                    Register::ATTR_VALUE,
                ),
            ])
            .await;
        objects
            .push
            .set_destination(PushDestination::new(
                TransportService::Tcp,
                config.push_address.clone(),
            ))
            .await;

        objects
            .scripts
            .add_script(
                SCRIPT_CAPTURE_BILLING,
                vec![ScriptAction::execute(
                    ProfileGeneric::CLASS_ID,
                    BillingProfile::default_obis(),
                    ProfileGeneric::METHOD_CAPTURE,
                    None,
                )],
            )
            .await?;
        objects
            .scripts
            .add_script(
                SCRIPT_CAPTURE_BLOCK_LOAD,
                vec![ScriptAction::execute(
                    ProfileGeneric::CLASS_ID,
                    BlockLoadProfile::default_obis(),
                    ProfileGeneric::METHOD_CAPTURE,
                    None,
                )],
            )
            .await?;

        let singles: Vec<Arc<dyn CosemObject>> = vec![
            objects.clock.clone() as Arc<dyn CosemObject>,
            objects.logical_device_name.clone(),
            objects.active_energy_import.clone(),
            objects.apparent_energy_import.clone(),
            objects.voltage.clone(),
            objects.current.clone(),
            objects.active_power.clone(),
            objects.frequency.clone(),
            objects.billing.clone(),
            objects.block_load.clone(),
            objects.push.clone(),
            objects.security.clone(),
            objects.scripts.clone(),
            objects.calendar.clone(),
        ];
        for object in singles {
            registry.register(object).await?;
        }
        objects.billing.install(registry).await?;
        objects.block_load.install(registry).await?;

        log::info!(
            "Installed {} objects for logical device {}",
            registry.len().await,
            config.logical_device_name
        );
        Ok(objects)
    }
}
