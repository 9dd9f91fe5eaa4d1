//! Per-client access rights
//!
//! Rights are looked up from the [`RightsRepository`] on every check, so a
//! grant or revoke takes effect for the very next request.

use crate::audit::{SecurityAuditLog, SecurityEvent, SecurityEventKind};
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult, ObisCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Access level, ordered from least to most privileged
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum AccessLevel {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
    Admin = 4,
}

impl AccessLevel {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessLevel::None => "NONE",
            AccessLevel::Read => "READ",
            AccessLevel::Write => "WRITE",
            AccessLevel::ReadWrite => "READ_WRITE",
            AccessLevel::Admin => "ADMIN",
        };
        f.write_str(name)
    }
}

/// Rights of one client on one object
///
/// `attribute_mask` holds 2 bits per attribute index (the highest level
/// permitted on that attribute), `method_mask` 1 bit per method index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRight {
    pub client_id: u16,
    pub object_id: ObisCode,
    pub access_level: AccessLevel,
    pub attribute_mask: u128,
    pub method_mask: u128,
}

impl AccessRight {
    /// Rights with empty attribute and method masks
    pub fn new(client_id: u16, object_id: ObisCode, access_level: AccessLevel) -> Self {
        Self {
            client_id,
            object_id,
            access_level,
            attribute_mask: 0,
            method_mask: 0,
        }
    }

    /// Rights with every attribute and method bit set
    pub fn unrestricted(client_id: u16, object_id: ObisCode, access_level: AccessLevel) -> Self {
        Self {
            attribute_mask: u128::MAX,
            method_mask: u128::MAX,
            ..Self::new(client_id, object_id, access_level)
        }
    }

    pub fn with_attribute_mask(mut self, mask: u128) -> Self {
        self.attribute_mask = mask;
        self
    }

    /// Set the 2-bit level of one attribute in the mask
    pub fn with_attribute_level(mut self, index: u8, level: AccessLevel) -> Self {
        if index < 64 {
            let shift = u32::from(index) * 2;
            let bits = u128::from(level.value().min(0b11));
            self.attribute_mask = (self.attribute_mask & !(0b11 << shift)) | (bits << shift);
        }
        self
    }

    pub fn with_method(mut self, index: u8) -> Self {
        if index < 128 {
            self.method_mask |= 1 << index;
        }
        self
    }

    /// Level the attribute mask grants on attribute `index`
    pub fn attribute_level(&self, index: u8) -> u8 {
        if index >= 64 {
            return 0;
        }
        ((self.attribute_mask >> (u32::from(index) * 2)) & 0b11) as u8
    }

    pub fn allows_method(&self, index: u8) -> bool {
        index < 128 && (self.method_mask >> index) & 1 == 1
    }
}

/// Storage of access rights
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RightsRepository: Send + Sync {
    async fn get(&self, client_id: u16, object_id: ObisCode) -> DlmsResult<Option<AccessRight>>;

    async fn put(&self, right: AccessRight) -> DlmsResult<()>;

    /// Remove the rights row; returns whether one existed
    async fn remove(&self, client_id: u16, object_id: ObisCode) -> DlmsResult<bool>;

    async fn list_for_client(&self, client_id: u16) -> DlmsResult<Vec<AccessRight>>;
}

/// Rights held in process memory
#[derive(Debug, Default)]
pub struct InMemoryRightsRepository {
    rights: RwLock<HashMap<(u16, ObisCode), AccessRight>>,
}

impl InMemoryRightsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RightsRepository for InMemoryRightsRepository {
    async fn get(&self, client_id: u16, object_id: ObisCode) -> DlmsResult<Option<AccessRight>> {
        Ok(self.rights.read().await.get(&(client_id, object_id)).copied())
    }

    async fn put(&self, right: AccessRight) -> DlmsResult<()> {
        self.rights
            .write()
            .await
            .insert((right.client_id, right.object_id), right);
        Ok(())
    }

    async fn remove(&self, client_id: u16, object_id: ObisCode) -> DlmsResult<bool> {
        Ok(self
            .rights
            .write()
            .await
            .remove(&(client_id, object_id))
            .is_some())
    }

    async fn list_for_client(&self, client_id: u16) -> DlmsResult<Vec<AccessRight>> {
        let mut rights: Vec<AccessRight> = self
            .rights
            .read()
            .await
            .values()
            .filter(|r| r.client_id == client_id)
            .copied()
            .collect();
        rights.sort_by_key(|r| r.object_id);
        Ok(rights)
    }
}

/// Access checks against the rights repository
pub struct AccessControlManager {
    repository: Arc<dyn RightsRepository>,
    audit: Arc<SecurityAuditLog>,
}

impl AccessControlManager {
    pub fn new(repository: Arc<dyn RightsRepository>, audit: Arc<SecurityAuditLog>) -> Self {
        Self { repository, audit }
    }

    /// Manager over an empty in-memory repository
    pub fn in_memory(audit: Arc<SecurityAuditLog>) -> Self {
        Self::new(Arc::new(InMemoryRightsRepository::new()), audit)
    }

    pub fn audit_log(&self) -> &Arc<SecurityAuditLog> {
        &self.audit
    }

    /// Check whether `client_id` may act on `object_id` at `required` level.
    ///
    /// Fails closed: no rights row or a lower granted level denies. When an
    /// attribute index is given its 2-bit mask entry must reach `required`;
    /// when a method index is given its bit must be set. Every outcome is
    /// recorded in the audit log.
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::Security`] if the repository cannot be read.
    pub async fn check_access(
        &self,
        client_id: u16,
        object_id: ObisCode,
        required: AccessLevel,
        attribute_index: Option<u8>,
        method_index: Option<u8>,
    ) -> DlmsResult<bool> {
        let rights = self
            .repository
            .get(client_id, object_id)
            .await
            .map_err(|e| DlmsError::Security(format!("failed to check access rights: {}", e)))?;

        let denial = match rights {
            None => Some("no access rights found".to_string()),
            Some(r) if r.access_level < required => Some(format!(
                "insufficient access level: granted {}, required {}",
                r.access_level, required
            )),
            Some(r) => match (attribute_index, method_index) {
                (Some(index), _) if r.attribute_level(index) < required.value() => {
                    Some(format!("attribute {} access denied", index))
                }
                (_, Some(index)) if !r.allows_method(index) => {
                    Some(format!("method {} access denied", index))
                }
                _ => None,
            },
        };

        let (kind, detail, granted) = match denial {
            Some(reason) => (SecurityEventKind::AccessDenied, reason, false),
            None => (
                SecurityEventKind::AccessGranted,
                format!(
                    "level {} attribute {:?} method {:?}",
                    required, attribute_index, method_index
                ),
                true,
            ),
        };
        self.audit
            .record(
                SecurityEvent::new(kind, detail)
                    .with_client(client_id)
                    .with_object(object_id),
            )
            .await;
        Ok(granted)
    }

    /// Store `right`, replacing earlier rights for the same client and object
    pub async fn grant_access(&self, right: AccessRight) -> DlmsResult<()> {
        self.repository
            .put(right)
            .await
            .map_err(|e| DlmsError::Security(format!("failed to grant access rights: {}", e)))?;
        self.audit
            .record(
                SecurityEvent::new(
                    SecurityEventKind::AccessRightsGranted,
                    format!(
                        "level {} attribute mask {:#x} method mask {:#x}",
                        right.access_level, right.attribute_mask, right.method_mask
                    ),
                )
                .with_client(right.client_id)
                .with_object(right.object_id),
            )
            .await;
        Ok(())
    }

    pub async fn revoke_access(&self, client_id: u16, object_id: ObisCode) -> DlmsResult<()> {
        let existed = self
            .repository
            .remove(client_id, object_id)
            .await
            .map_err(|e| DlmsError::Security(format!("failed to revoke access rights: {}", e)))?;
        let detail = if existed {
            "rights removed"
        } else {
            "no rights to remove"
        };
        self.audit
            .record(
                SecurityEvent::new(SecurityEventKind::AccessRightsRevoked, detail)
                    .with_client(client_id)
                    .with_object(object_id),
            )
            .await;
        Ok(())
    }

    pub async fn rights_for(&self, client_id: u16) -> DlmsResult<Vec<AccessRight>> {
        self.repository.list_for_client(client_id).await
    }
}

impl fmt::Debug for AccessControlManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessControlManager").finish_non_exhaustive()
    }
}
