//! Association LN interface class (Class ID: 15)
//!
//! One Association LN object describes the association of one client. Its
//! object list is read from the registry, so objects registered or removed
//! later show up on the next read.
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - 0-0:40.0.<client>.255
//! - Attribute 2: object_list - `array of structure { class_id, version, logical_name }`
//! - Attribute 3: associated_partners_id - `structure { client_sap, server_sap }`
//! - Attribute 4: application_context_name - Logical name referencing, no ciphering
//! - Attribute 6: authentication_mechanism_name - Mechanism of the association
//! - Attribute 8: association_status - 0 non-associated, 1 pending, 2 associated
//!
//! # Methods
//!
//! None
//!
//! # Usage
//!
//! ```rust,no_run
//! use dlms_interface::{AssociationLn, AssociationStatus, ObjectRegistry};
//! use std::sync::Arc;
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! let registry = Arc::new(ObjectRegistry::new());
//! let association = Arc::new(AssociationLn::new(16, Arc::downgrade(&registry))?);
//! registry.register(association.clone()).await?;
//!
//! association.set_status(AssociationStatus::Associated).await;
//! # Ok(())
//! # }
//! ```

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use crate::registry::{self, ObjectRegistry};
use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use dlms_security::AuthenticationMechanism;
use std::fmt;
use std::sync::Weak;
use tokio::sync::RwLock;

/// Server SAP of the management logical device
pub const MANAGEMENT_SERVER_SAP: u16 = 1;

/// HDLC client addresses are 7 bits wide
pub const MAX_CLIENT_SAP: u8 = 0x7F;

/// Prefix of the DLMS UA object identifiers, `2.16.756.5.8` in compact form
const DLMS_UA_OID: [u8; 5] = [0x60, 0x85, 0x74, 0x05, 0x08];
const APPLICATION_CONTEXT_ARC: u8 = 1;
const MECHANISM_NAME_ARC: u8 = 2;
/// Logical name referencing without ciphering
const LN_NO_CIPHERING: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationStatus {
    NonAssociated = 0,
    AssociationPending = 1,
    Associated = 2,
}

impl fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationStatus::NonAssociated => "non-associated",
            AssociationStatus::AssociationPending => "association-pending",
            AssociationStatus::Associated => "associated",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct AssociationState {
    status: AssociationStatus,
    authentication: AuthenticationMechanism,
}

/// Association LN interface class (Class ID: 15)
pub struct AssociationLn {
    schema: ObjectSchema,
    client_sap: i8,
    registry: Weak<ObjectRegistry>,
    state: RwLock<AssociationState>,
}

impl AssociationLn {
    pub const CLASS_ID: u16 = 15;

    /// Attribute IDs
    pub const ATTR_OBJECT_LIST: u8 = 2;
    pub const ATTR_ASSOCIATED_PARTNERS_ID: u8 = 3;
    pub const ATTR_APPLICATION_CONTEXT_NAME: u8 = 4;
    pub const ATTR_AUTHENTICATION_MECHANISM_NAME: u8 = 6;
    pub const ATTR_ASSOCIATION_STATUS: u8 = 8;

    /// Logical name of the association object of `client_id`
    ///
    /// # Returns
    ///
    /// `0-0:40.0.<client_id>.255`, or `None` for ids outside the 7-bit
    /// client SAP range.
    pub fn obis_for_client(client_id: u16) -> Option<ObisCode> {
        u8::try_from(client_id)
            .ok()
            .filter(|client| *client <= MAX_CLIENT_SAP)
            .map(|client| ObisCode::new(0, 0, 40, 0, client, 255))
    }

    /// Create the association object of one client
    ///
    /// # Arguments
    ///
    /// * `client_id` - Client SAP, also the E field of the logical name
    /// * `registry` - Registry whose contents make up the object list
    ///
    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] if `client_id` is above 127.
    pub fn new(client_id: u16, registry: Weak<ObjectRegistry>) -> DlmsResult<Self> {
        let logical_name = Self::obis_for_client(client_id).ok_or_else(|| {
            DlmsError::RangeViolation(format!("client SAP {} has no association object", client_id))
        })?;
        let client_sap = i8::try_from(client_id)
            .map_err(|_| DlmsError::RangeViolation(format!("client SAP {}", client_id)))?;

        Ok(Self {
            schema: ObjectSchema::new(Self::CLASS_ID, logical_name)
                .with_attribute(
                    Self::ATTR_OBJECT_LIST,
                    "object_list",
                    DataObjectType::Array,
                    AttributeAccess::ReadOnly,
                )
                .with_attribute(
                    Self::ATTR_ASSOCIATED_PARTNERS_ID,
                    "associated_partners_id",
                    DataObjectType::Structure,
                    AttributeAccess::ReadOnly,
                )
                .with_attribute(
                    Self::ATTR_APPLICATION_CONTEXT_NAME,
                    "application_context_name",
                    DataObjectType::OctetString,
                    AttributeAccess::ReadOnly,
                )
                .with_attribute(
                    Self::ATTR_AUTHENTICATION_MECHANISM_NAME,
                    "authentication_mechanism_name",
                    DataObjectType::OctetString,
                    AttributeAccess::ReadOnly,
                )
                .with_attribute(
                    Self::ATTR_ASSOCIATION_STATUS,
                    "association_status",
                    DataObjectType::Enumerate,
                    AttributeAccess::ReadOnly,
                ),
            client_sap,
            registry,
            state: RwLock::new(AssociationState {
                status: AssociationStatus::NonAssociated,
                authentication: AuthenticationMechanism::None,
            }),
        })
    }

    pub fn client_sap(&self) -> i8 {
        self.client_sap
    }

    pub async fn status(&self) -> AssociationStatus {
        self.state.read().await.status
    }

    pub async fn set_status(&self, status: AssociationStatus) {
        let mut state = self.state.write().await;
        if state.status != status {
            log::debug!("{} {} -> {}", self.schema.logical_name(), state.status, status);
            state.status = status;
        }
    }

    pub async fn set_authentication(&self, mechanism: AuthenticationMechanism) {
        self.state.write().await.authentication = mechanism;
    }

    /// Every registered object, sorted by logical name
    async fn object_list(&self) -> DlmsResult<DataObject> {
        let registry = registry::upgrade(&self.registry)?;
        let mut entries = Vec::new();
        for logical_name in registry.logical_names().await {
            // removed between listing and lookup
            let Some(object) = registry.get(&logical_name).await else {
                continue;
            };
            entries.push(DataObject::Structure(vec![
                DataObject::Unsigned16(object.class_id()),
                DataObject::Unsigned8(0),
                DataObject::OctetString(logical_name.to_bytes().to_vec()),
            ]));
        }
        Ok(DataObject::Array(entries))
    }
}

fn dlms_oid(arc: u8, id: u8) -> DataObject {
    let mut oid = DLMS_UA_OID.to_vec();
    oid.extend_from_slice(&[arc, id]);
    DataObject::OctetString(oid)
}

#[async_trait]
impl CosemObject for AssociationLn {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        match attribute_id {
            Self::ATTR_OBJECT_LIST => self.object_list().await,
            Self::ATTR_ASSOCIATED_PARTNERS_ID => Ok(DataObject::Structure(vec![
                DataObject::Integer8(self.client_sap),
                DataObject::Unsigned16(MANAGEMENT_SERVER_SAP),
            ])),
            Self::ATTR_APPLICATION_CONTEXT_NAME => {
                Ok(dlms_oid(APPLICATION_CONTEXT_ARC, LN_NO_CIPHERING))
            }
            Self::ATTR_AUTHENTICATION_MECHANISM_NAME => {
                let mechanism = self.state.read().await.authentication;
                Ok(dlms_oid(MECHANISM_NAME_ARC, mechanism as u8))
            }
            Self::ATTR_ASSOCIATION_STATUS => {
                Ok(DataObject::Enumerate(self.state.read().await.status as u8))
            }
            _ => Err(self.schema.invalid_attribute(attribute_id)),
        }
    }

    async fn handle_set(&self, attribute_id: u8, _value: DataObject) -> DlmsResult<()> {
        Err(DlmsError::ReadOnlyViolation(attribute_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use std::sync::Arc;

    const METER_ID: ObisCode = ObisCode::new(0, 0, 96, 1, 0, 255);

    async fn setup() -> (Arc<ObjectRegistry>, Arc<AssociationLn>) {
        let registry = Arc::new(ObjectRegistry::new());
        let meter_id = Data::new(METER_ID, DataObjectType::Unsigned, DataObject::Unsigned8(1)).unwrap();
        registry.register(Arc::new(meter_id)).await.unwrap();

        let association = Arc::new(AssociationLn::new(16, Arc::downgrade(&registry)).unwrap());
        registry.register(association.clone()).await.unwrap();
        (registry, association)
    }

    #[tokio::test]
    async fn test_association_ln_class_id() {
        let (_registry, association) = setup().await;
        assert_eq!(association.class_id(), 15);
        assert_eq!(association.obis_code(), ObisCode::new(0, 0, 40, 0, 16, 255));
        assert_eq!(AssociationLn::obis_for_client(127), Some(ObisCode::new(0, 0, 40, 0, 127, 255)));
        assert!(AssociationLn::obis_for_client(200).is_none());
        assert!(matches!(
            AssociationLn::new(200, Weak::new()),
            Err(DlmsError::RangeViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_object_list_follows_registry() {
        let (registry, association) = setup().await;
        let list = association.get_attribute(AssociationLn::ATTR_OBJECT_LIST).await.unwrap();
        assert_eq!(
            list,
            DataObject::Array(vec![
                DataObject::Structure(vec![
                    DataObject::Unsigned16(15),
                    DataObject::Unsigned8(0),
                    DataObject::OctetString(vec![0, 0, 40, 0, 16, 255]),
                ]),
                DataObject::Structure(vec![
                    DataObject::Unsigned16(1),
                    DataObject::Unsigned8(0),
                    DataObject::OctetString(METER_ID.to_bytes().to_vec()),
                ]),
            ])
        );

        registry.remove(&METER_ID).await;
        let list = association.get_attribute(AssociationLn::ATTR_OBJECT_LIST).await.unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partners_and_status() {
        let (_registry, association) = setup().await;
        assert_eq!(
            association.get_attribute(3).await.unwrap(),
            DataObject::Structure(vec![DataObject::Integer8(16), DataObject::Unsigned16(1)])
        );
        assert_eq!(association.get_attribute(8).await.unwrap(), DataObject::Enumerate(0));

        association.set_status(AssociationStatus::Associated).await;
        association.set_authentication(AuthenticationMechanism::Low).await;
        assert_eq!(association.get_attribute(8).await.unwrap(), DataObject::Enumerate(2));
        assert_eq!(
            association.get_attribute(6).await.unwrap(),
            DataObject::OctetString(vec![0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01])
        );
        assert_eq!(
            association.set_attribute(8, DataObject::Enumerate(0)).await,
            Err(DlmsError::ReadOnlyViolation(8))
        );
    }

    #[tokio::test]
    async fn test_object_list_needs_registry() {
        let association = AssociationLn::new(1, Weak::new()).unwrap();
        assert!(matches!(
            association.get_attribute(2).await,
            Err(DlmsError::InvalidState(_))
        ));
    }
}
