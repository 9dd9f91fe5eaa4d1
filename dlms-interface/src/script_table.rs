//! Script Table interface class (Class ID: 9)
//!
//! A script table holds numbered scripts; each script is an ordered list of
//! actions that write an attribute of, or invoke a method on, another object
//! of the same logical device.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: scripts - Array of `structure { script_id, array of actions }`
//!
//! An action is encoded as
//! `structure { service_id, class_id, logical_name, index, parameter }` where
//! service 1 writes attribute `index` and service 2 executes method `index`.
//! Index 0 stands for "not given".
//!
//! # Methods
//!
//! - Method 1: execute(script_id) - Run a script

use crate::object::{required_parameter, AttributeAccess, CosemObject, ObjectSchema};
use crate::registry::{self, ObjectRegistry};
use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use std::collections::BTreeMap;
use std::sync::Weak;
use tokio::sync::RwLock;

/// Method invoked by an execute action that names no method
pub const DEFAULT_EXECUTE_METHOD: u8 = 1;

/// Deepest chain of scripts that may start other scripts
pub const MAX_SCRIPT_DEPTH: u8 = 4;

tokio::task_local! {
    static SCRIPT_DEPTH: u8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptActionType {
    Write = 1,
    Execute = 2,
}

impl ScriptActionType {
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            1 => Ok(ScriptActionType::Write),
            2 => Ok(ScriptActionType::Execute),
            _ => Err(DlmsError::RangeViolation(format!(
                "script service id {} not in 1..=2",
                id
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptAction {
    pub action_type: ScriptActionType,
    pub class_id: u16,
    pub logical_name: ObisCode,
    /// Attribute id for writes, method id for executes
    pub index: Option<u8>,
    pub parameter: Option<DataObject>,
}

impl ScriptAction {
    pub fn write(class_id: u16, logical_name: ObisCode, attribute_id: u8, value: DataObject) -> Self {
        Self {
            action_type: ScriptActionType::Write,
            class_id,
            logical_name,
            index: Some(attribute_id),
            parameter: Some(value),
        }
    }

    pub fn execute(
        class_id: u16,
        logical_name: ObisCode,
        method_id: u8,
        parameter: Option<DataObject>,
    ) -> Self {
        Self {
            action_type: ScriptActionType::Execute,
            class_id,
            logical_name,
            index: Some(method_id),
            parameter,
        }
    }

    fn to_data_object(&self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::Enumerate(self.action_type as u8),
            DataObject::Unsigned16(self.class_id),
            DataObject::OctetString(self.logical_name.to_bytes().to_vec()),
            DataObject::Unsigned8(self.index.unwrap_or(0)),
            self.parameter.clone().unwrap_or(DataObject::Null),
        ])
    }

    fn from_data_object(value: &DataObject) -> DlmsResult<Self> {
        let fields = value.as_structure_of(5)?;
        let action_type = ScriptActionType::from_id(narrow(&fields[0], "service id")?)?;
        let class_id = narrow(&fields[1], "class id")?;
        let logical_name = ObisCode::from_bytes(fields[2].as_octet_string()?)?;
        let index = match narrow::<u8>(&fields[3], "index")? {
            0 => None,
            index => Some(index),
        };
        let parameter = match &fields[4] {
            DataObject::Null => None,
            other => Some(other.clone()),
        };
        Ok(Self {
            action_type,
            class_id,
            logical_name,
            index,
            parameter,
        })
    }
}

fn narrow<T: TryFrom<i64>>(value: &DataObject, what: &str) -> DlmsResult<T> {
    T::try_from(value.as_i64()?)
        .map_err(|_| DlmsError::RangeViolation(format!("{} {} out of range", what, value)))
}

fn validate_script(script_id: u16, actions: &[ScriptAction]) -> DlmsResult<()> {
    if script_id == 0 {
        return Err(DlmsError::RangeViolation(
            "script id must be positive".to_string(),
        ));
    }
    if actions.is_empty() {
        return Err(DlmsError::InvalidData(format!(
            "script {} has no actions",
            script_id
        )));
    }
    for action in actions {
        if action.action_type == ScriptActionType::Write && action.index.is_none() {
            return Err(DlmsError::InvalidData(format!(
                "script {}: write to {} without attribute id",
                script_id, action.logical_name
            )));
        }
    }
    Ok(())
}

/// Script Table interface class (Class ID: 9)
///
/// Default OBIS for the tariffication script table: 0-0:10.0.100.255
pub struct ScriptTable {
    schema: ObjectSchema,
    registry: Weak<ObjectRegistry>,
    scripts: RwLock<BTreeMap<u16, Vec<ScriptAction>>>,
}

impl ScriptTable {
    pub const CLASS_ID: u16 = 9;

    /// Attribute IDs
    pub const ATTR_SCRIPTS: u8 = 2;

    /// Method IDs
    pub const METHOD_EXECUTE: u8 = 1;

    pub fn default_obis() -> ObisCode {
        ObisCode::new(0, 0, 10, 0, 100, 255)
    }

    /// Create an empty table whose actions resolve objects in `registry`
    pub fn new(logical_name: ObisCode, registry: Weak<ObjectRegistry>) -> Self {
        Self {
            schema: ObjectSchema::new(Self::CLASS_ID, logical_name)
                .with_attribute(
                    Self::ATTR_SCRIPTS,
                    "scripts",
                    DataObjectType::Array,
                    AttributeAccess::ReadWrite,
                )
                .with_method(Self::METHOD_EXECUTE, "execute"),
            registry,
            scripts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or replace a script
    ///
    /// # Errors
    ///
    /// Rejects id 0, empty scripts and writes without an attribute id.
    pub async fn add_script(&self, script_id: u16, actions: Vec<ScriptAction>) -> DlmsResult<()> {
        validate_script(script_id, &actions)?;
        self.scripts.write().await.insert(script_id, actions);
        Ok(())
    }

    pub async fn remove_script(&self, script_id: u16) -> bool {
        self.scripts.write().await.remove(&script_id).is_some()
    }

    pub async fn script(&self, script_id: u16) -> Option<Vec<ScriptAction>> {
        self.scripts.read().await.get(&script_id).cloned()
    }

    pub async fn script_ids(&self) -> Vec<u16> {
        self.scripts.read().await.keys().copied().collect()
    }

    /// Run the actions of a script in order, stopping at the first failure
    ///
    /// # Arguments
    ///
    /// * `script_id` - Id of a script added with [`ScriptTable::add_script`]
    ///
    /// # Errors
    ///
    /// [`DlmsError::InvalidState`] when scripts nest deeper than
    /// [`MAX_SCRIPT_DEPTH`], which also stops a script that executes itself.
    pub async fn execute_script(&self, script_id: u16) -> DlmsResult<()> {
        let depth = SCRIPT_DEPTH.try_with(|depth| *depth).unwrap_or(0);
        if depth >= MAX_SCRIPT_DEPTH {
            log::warn!(
                "{} script {} nested {} deep, aborted",
                self.schema.logical_name(),
                script_id,
                depth
            );
            return Err(DlmsError::InvalidState(format!(
                "script {} exceeds nesting depth {}",
                script_id, MAX_SCRIPT_DEPTH
            )));
        }
        SCRIPT_DEPTH.scope(depth + 1, self.run_script(script_id)).await
    }

    async fn run_script(&self, script_id: u16) -> DlmsResult<()> {
        let actions = self.script(script_id).await.ok_or_else(|| {
            DlmsError::InvalidData(format!("script {} does not exist", script_id))
        })?;
        let registry = registry::upgrade(&self.registry)?;

        log::debug!(
            "{} executing script {} ({} actions)",
            self.schema.logical_name(),
            script_id,
            actions.len()
        );
        for action in actions {
            let target = registry.resolve(action.class_id, &action.logical_name).await?;
            match action.action_type {
                ScriptActionType::Write => {
                    let attribute_id = action.index.ok_or_else(|| {
                        DlmsError::InvalidData("write action without attribute id".to_string())
                    })?;
                    target
                        .set_attribute(attribute_id, action.parameter.unwrap_or(DataObject::Null))
                        .await?;
                }
                ScriptActionType::Execute => {
                    target
                        .invoke_method(
                            action.index.unwrap_or(DEFAULT_EXECUTE_METHOD),
                            action.parameter,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn scripts_data_object(&self) -> DataObject {
        let scripts = self.scripts.read().await;
        DataObject::Array(
            scripts
                .iter()
                .map(|(script_id, actions)| {
                    DataObject::Structure(vec![
                        DataObject::Unsigned16(*script_id),
                        DataObject::Array(actions.iter().map(ScriptAction::to_data_object).collect()),
                    ])
                })
                .collect(),
        )
    }

    async fn replace_scripts(&self, value: &DataObject) -> DlmsResult<()> {
        let mut scripts = BTreeMap::new();
        for script in value.as_array()? {
            let fields = script.as_structure_of(2)?;
            let script_id = narrow(&fields[0], "script id")?;
            let actions = fields[1]
                .as_array()?
                .iter()
                .map(ScriptAction::from_data_object)
                .collect::<DlmsResult<Vec<_>>>()?;
            validate_script(script_id, &actions)?;
            scripts.insert(script_id, actions);
        }
        *self.scripts.write().await = scripts;
        Ok(())
    }
}

#[async_trait]
impl CosemObject for ScriptTable {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            Self::ATTR_SCRIPTS => Ok(self.scripts_data_object().await),
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_SCRIPTS => self.replace_scripts(&value).await,
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_action(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_EXECUTE => {
                let script_id = narrow(&required_parameter(method_id, parameters)?, "script id")?;
                self.execute_script(script_id).await?;
                Ok(None)
            }
            _ => Err(self.schema.invalid_method(method_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use crate::register::Register;
    use crate::scaler_unit::{units, ScalerUnit};
    use std::sync::Arc;

    const RELAY: ObisCode = ObisCode::new(0, 0, 96, 3, 10, 255);
    const ENERGY: ObisCode = ObisCode::new(1, 0, 1, 8, 0, 255);

    async fn setup() -> (Arc<ObjectRegistry>, Arc<ScriptTable>, Arc<Register>) {
        let registry = Arc::new(ObjectRegistry::new());
        let relay = Data::new(RELAY, DataObjectType::Boolean, DataObject::Boolean(false)).unwrap();
        registry.register(Arc::new(relay)).await.unwrap();

        let energy = Arc::new(
            Register::new(ENERGY, DataObjectType::DoubleLongUnsigned, ScalerUnit::new(0, units::WATT_HOUR))
                .unwrap(),
        );
        energy.set_reading(900.0).await.unwrap();
        registry.register(energy.clone()).await.unwrap();

        let table = Arc::new(ScriptTable::new(
            ScriptTable::default_obis(),
            Arc::downgrade(&registry),
        ));
        registry.register(table.clone()).await.unwrap();
        (registry, table, energy)
    }

    #[tokio::test]
    async fn test_script_table_class_id() {
        let (_registry, table, _) = setup().await;
        assert_eq!(table.class_id(), 9);
    }

    #[tokio::test]
    async fn test_execute_script_runs_actions_in_order() {
        let (registry, table, energy) = setup().await;
        table
            .add_script(
                1,
                vec![
                    ScriptAction::write(1, RELAY, 2, DataObject::Boolean(true)),
                    ScriptAction::execute(3, ENERGY, 1, None),
                ],
            )
            .await
            .unwrap();

        table.invoke_method(1, Some(DataObject::Unsigned16(1))).await.unwrap();

        let relay = registry.get(&RELAY).await.unwrap();
        assert_eq!(relay.get_attribute(2).await.unwrap(), DataObject::Boolean(true));
        assert_eq!(energy.value().await, DataObject::Unsigned32(0));
    }

    #[tokio::test]
    async fn test_script_validation() {
        let (_registry, table, _) = setup().await;
        assert!(table.add_script(0, vec![ScriptAction::execute(3, ENERGY, 1, None)]).await.is_err());
        assert!(table.add_script(2, vec![]).await.is_err());

        let mut write = ScriptAction::write(1, RELAY, 2, DataObject::Boolean(true));
        write.index = None;
        assert!(table.add_script(3, vec![write]).await.is_err());
        assert!(table.script_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_fails_on_missing_target() {
        let (_registry, table, _) = setup().await;
        table
            .add_script(
                4,
                vec![ScriptAction::execute(3, ObisCode::new(1, 0, 2, 8, 0, 255), 1, None)],
            )
            .await
            .unwrap();
        assert!(matches!(
            table.execute_script(4).await,
            Err(DlmsError::ObjectNotFound(_))
        ));
        assert!(table.execute_script(5).await.is_err());
    }

    #[tokio::test]
    async fn test_self_executing_script_stops_at_depth_limit() {
        let (registry, table, _) = setup().await;
        table
            .add_script(
                8,
                vec![
                    ScriptAction::write(1, RELAY, 2, DataObject::Boolean(true)),
                    ScriptAction::execute(
                        9,
                        ScriptTable::default_obis(),
                        ScriptTable::METHOD_EXECUTE,
                        Some(DataObject::Unsigned16(8)),
                    ),
                ],
            )
            .await
            .unwrap();

        assert!(matches!(table.execute_script(8).await, Err(DlmsError::InvalidState(_))));
        let relay = registry.get(&RELAY).await.unwrap();
        assert_eq!(relay.get_attribute(2).await.unwrap(), DataObject::Boolean(true));

        // the guard is per call chain, a fresh call is not affected
        table
            .add_script(1, vec![ScriptAction::write(1, RELAY, 2, DataObject::Boolean(false))])
            .await
            .unwrap();
        table.execute_script(1).await.unwrap();
        assert_eq!(relay.get_attribute(2).await.unwrap(), DataObject::Boolean(false));
    }

    #[tokio::test]
    async fn test_scripts_attribute() {
        let (_registry, table, _) = setup().await;
        table
            .add_script(7, vec![ScriptAction::write(1, RELAY, 2, DataObject::Boolean(false))])
            .await
            .unwrap();

        let scripts = table.get_attribute(2).await.unwrap();
        assert_eq!(scripts.as_array().unwrap().len(), 1);

        table.remove_script(7).await;
        table.set_attribute(2, scripts).await.unwrap();
        assert_eq!(
            table.script(7).await,
            Some(vec![ScriptAction::write(1, RELAY, 2, DataObject::Boolean(false))])
        );
    }
}
