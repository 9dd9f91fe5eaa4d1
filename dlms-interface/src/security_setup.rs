//! COSEM Security Setup interface class (Class ID: 64)
//!
//! This interface class manages the security policy and suite of the logical
//! device. Key material itself lives in the shared [`KeyManager`]; the
//! Security Setup object is the COSEM face of it.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: security_policy - Active security policy
//! - Attribute 3: security_suite - Active security suite
//! - Attribute 4: client_system_title - System title of the associated client (read-only)
//! - Attribute 5: server_system_title - System title of this device (read-only)
//!
//! # Methods
//!
//! - Method 1: security_activate(policy) - Switch to an enabled policy
//! - Method 2: key_transfer(array of {key_id, key}) - Replace key material
//! - Method 3: key_agreement({key_id, data}) - Delegated to a [`KeyAgreement`] provider
//! - Method 4: generate_key_pair(key_id) - Delegated to a [`KeyAgreement`] provider

use crate::object::{required_parameter, AttributeAccess, CosemObject, ObjectSchema};
use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use dlms_security::{
    KeyId, KeyManager, SecurityAuditLog, SecurityEvent, SecurityEventKind, SecurityPolicy,
    SecuritySuite,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Length of a system title in bytes
pub const SYSTEM_TITLE_LENGTH: usize = 8;

/// Asymmetric key operations the device does not implement itself
#[async_trait]
pub trait KeyAgreement: Send + Sync {
    /// Run a key agreement for `key_id` over the client's opaque `data`
    async fn agree(&self, key_id: KeyId, data: &[u8]) -> DlmsResult<Vec<u8>>;

    /// Generate a key pair for `key_id` and return its public part
    async fn generate_key_pair(&self, key_id: KeyId) -> DlmsResult<Vec<u8>>;
}

/// Provider that rejects every request
#[derive(Debug, Default)]
pub struct UnsupportedKeyAgreement;

#[async_trait]
impl KeyAgreement for UnsupportedKeyAgreement {
    async fn agree(&self, key_id: KeyId, _data: &[u8]) -> DlmsResult<Vec<u8>> {
        Err(DlmsError::NotImplemented(format!("key agreement for {} key", key_id)))
    }

    async fn generate_key_pair(&self, key_id: KeyId) -> DlmsResult<Vec<u8>> {
        Err(DlmsError::NotImplemented(format!("key pair generation for {} key", key_id)))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SecurityState {
    policy: SecurityPolicy,
    suite: SecuritySuite,
    client_system_title: [u8; SYSTEM_TITLE_LENGTH],
    server_system_title: [u8; SYSTEM_TITLE_LENGTH],
    /// Indexed by policy id
    enabled: [bool; 4],
}

/// Security Setup interface class (Class ID: 64)
///
/// Default OBIS: 0-0:43.0.0.255
pub struct SecuritySetup {
    schema: ObjectSchema,
    keys: Arc<KeyManager>,
    audit: Arc<SecurityAuditLog>,
    key_agreement: Arc<dyn KeyAgreement>,
    state: RwLock<SecurityState>,
}

impl SecuritySetup {
    pub const CLASS_ID: u16 = 64;

    /// Attribute IDs
    pub const ATTR_SECURITY_POLICY: u8 = 2;
    pub const ATTR_SECURITY_SUITE: u8 = 3;
    pub const ATTR_CLIENT_SYSTEM_TITLE: u8 = 4;
    pub const ATTR_SERVER_SYSTEM_TITLE: u8 = 5;

    /// Method IDs
    pub const METHOD_SECURITY_ACTIVATE: u8 = 1;
    pub const METHOD_KEY_TRANSFER: u8 = 2;
    pub const METHOD_KEY_AGREEMENT: u8 = 3;
    pub const METHOD_GENERATE_KEY_PAIR: u8 = 4;

    pub fn default_obis() -> ObisCode {
        ObisCode::new(0, 0, 43, 0, 0, 255)
    }

    /// Create the object with policy `Nothing`, suite 0 and every policy enabled
    pub fn new(
        logical_name: ObisCode,
        server_system_title: [u8; SYSTEM_TITLE_LENGTH],
        keys: Arc<KeyManager>,
        audit: Arc<SecurityAuditLog>,
    ) -> Self {
        let schema = ObjectSchema::new(Self::CLASS_ID, logical_name)
            .with_attribute(
                Self::ATTR_SECURITY_POLICY,
                "security_policy",
                DataObjectType::Enumerate,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_SECURITY_SUITE,
                "security_suite",
                DataObjectType::Enumerate,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_CLIENT_SYSTEM_TITLE,
                "client_system_title",
                DataObjectType::OctetString,
                AttributeAccess::ReadOnly,
            )
            .with_attribute(
                Self::ATTR_SERVER_SYSTEM_TITLE,
                "server_system_title",
                DataObjectType::OctetString,
                AttributeAccess::ReadOnly,
            )
            .with_method(Self::METHOD_SECURITY_ACTIVATE, "security_activate")
            .with_method(Self::METHOD_KEY_TRANSFER, "key_transfer")
            .with_method(Self::METHOD_KEY_AGREEMENT, "key_agreement")
            .with_method(Self::METHOD_GENERATE_KEY_PAIR, "generate_key_pair");
        Self {
            schema,
            keys,
            audit,
            key_agreement: Arc::new(UnsupportedKeyAgreement),
            state: RwLock::new(SecurityState {
                policy: SecurityPolicy::Nothing,
                suite: SecuritySuite::default(),
                client_system_title: [0; SYSTEM_TITLE_LENGTH],
                server_system_title,
                enabled: [true; 4],
            }),
        }
    }

    pub fn with_key_agreement(mut self, key_agreement: Arc<dyn KeyAgreement>) -> Self {
        self.key_agreement = key_agreement;
        self
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub async fn security_policy(&self) -> SecurityPolicy {
        self.state.read().await.policy
    }

    pub async fn security_suite(&self) -> SecuritySuite {
        self.state.read().await.suite
    }

    pub async fn set_security_suite(&self, suite: SecuritySuite) {
        self.state.write().await.suite = suite;
    }

    pub async fn client_system_title(&self) -> [u8; SYSTEM_TITLE_LENGTH] {
        self.state.read().await.client_system_title
    }

    /// Record the system title presented by the associated client
    pub async fn set_client_system_title(&self, title: [u8; SYSTEM_TITLE_LENGTH]) {
        self.state.write().await.client_system_title = title;
    }

    pub async fn server_system_title(&self) -> [u8; SYSTEM_TITLE_LENGTH] {
        self.state.read().await.server_system_title
    }

    pub async fn set_policy_enabled(&self, policy: SecurityPolicy, enabled: bool) {
        self.state.write().await.enabled[usize::from(policy.id())] = enabled;
    }

    /// Switch the active security policy
    ///
    /// # Errors
    ///
    /// [`DlmsError::SecurityPolicyViolation`] if `policy` is disabled. The
    /// refusal is recorded in the audit log.
    pub async fn activate_policy(&self, policy: SecurityPolicy) -> DlmsResult<()> {
        let previous = {
            let mut state = self.state.write().await;
            if !state.enabled[usize::from(policy.id())] {
                None
            } else {
                Some(std::mem::replace(&mut state.policy, policy))
            }
        };

        match previous {
            Some(previous) => {
                self.audit
                    .record(
                        SecurityEvent::new(
                            SecurityEventKind::PolicyActivated,
                            format!("security policy {:?} -> {:?}", previous, policy),
                        )
                        .with_object(self.obis_code()),
                    )
                    .await;
                Ok(())
            }
            None => {
                let error = DlmsError::SecurityPolicyViolation(format!(
                    "security policy {:?} is disabled",
                    policy
                ));
                self.audit
                    .record(
                        SecurityEvent::new(SecurityEventKind::PolicyViolation, error.to_string())
                            .with_object(self.obis_code()),
                    )
                    .await;
                Err(error)
            }
        }
    }

    /// Apply a `key_transfer` parameter: one `{key_id, key}` structure or an
    /// array of them. Keys are transferred in order; the first failure stops.
    async fn transfer_keys(&self, parameter: &DataObject) -> DlmsResult<()> {
        let entries = match parameter {
            DataObject::Array(entries) => entries.as_slice(),
            single => std::slice::from_ref(single),
        };
        for entry in entries {
            let fields = entry.as_structure_of(2)?;
            let key_id = KeyId::from_id(enumeration(&fields[0])?)?;
            self.keys
                .transfer_key(key_id, fields[1].as_octet_string()?)
                .await?;
        }
        Ok(())
    }
}

fn enumeration(value: &DataObject) -> DlmsResult<u8> {
    let raw = value.as_i64()?;
    u8::try_from(raw).map_err(|_| DlmsError::RangeViolation(format!("enumeration {}", raw)))
}

#[async_trait]
impl CosemObject for SecuritySetup {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        let state = self.state.read().await;
        let value = match attribute_id {
            Self::ATTR_SECURITY_POLICY => DataObject::Enumerate(state.policy.id()),
            Self::ATTR_SECURITY_SUITE => DataObject::Enumerate(state.suite.id()),
            Self::ATTR_CLIENT_SYSTEM_TITLE => DataObject::OctetString(state.client_system_title.to_vec()),
            Self::ATTR_SERVER_SYSTEM_TITLE => DataObject::OctetString(state.server_system_title.to_vec()),
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        };
        Ok(value)
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_SECURITY_POLICY => {
                self.activate_policy(SecurityPolicy::from_id(enumeration(&value)?)?)
                    .await
            }
            Self::ATTR_SECURITY_SUITE => {
                self.set_security_suite(SecuritySuite::from_id(enumeration(&value)?)?)
                    .await;
                Ok(())
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
            Self::METHOD_SECURITY_ACTIVATE => {
                let parameter = required_parameter(method_id, parameters)?;
                self.activate_policy(SecurityPolicy::from_id(enumeration(&parameter)?)?)
                    .await?;
                Ok(None)
            }
            Self::METHOD_KEY_TRANSFER => {
                let parameter = required_parameter(method_id, parameters)?;
                self.transfer_keys(&parameter).await?;
                Ok(None)
            }
            Self::METHOD_KEY_AGREEMENT => {
                let parameter = required_parameter(method_id, parameters)?;
                let fields = parameter.as_structure_of(2)?;
                let key_id = KeyId::from_id(enumeration(&fields[0])?)?;
                let response = self
                    .key_agreement
                    .agree(key_id, fields[1].as_octet_string()?)
                    .await?;
                Ok(Some(DataObject::OctetString(response)))
            }
            Self::METHOD_GENERATE_KEY_PAIR => {
                let parameter = required_parameter(method_id, parameters)?;
                let key_id = KeyId::from_id(enumeration(&parameter)?)?;
                let public_key = self.key_agreement.generate_key_pair(key_id).await?;
                Ok(Some(DataObject::OctetString(public_key)))
            }
            _ => Err(self.schema.invalid_method(method_id)),
        }
    }
}
