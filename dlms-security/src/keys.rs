//! Key material lifecycle
//!
//! The [`KeyManager`] holds the master, authentication and encryption keys
//! of the simulated meter. Keys start out random, can be rotated or replaced
//! through key transfer, and back the AES-128-GCM sealing and HMAC-SHA256
//! authentication tokens.

use crate::audit::{SecurityAuditLog, SecurityEvent, SecurityEventKind};
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Nonce, Tag};
use chrono::{DateTime, Utc};
use dlms_core::{DlmsError, DlmsResult};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

pub const MASTER_KEY_LENGTH: usize = 32;
pub const AUTHENTICATION_KEY_LENGTH: usize = 16;
pub const ENCRYPTION_KEY_LENGTH: usize = 16;

/// IV length of sealed data
pub const IV_LENGTH: usize = 12;
/// Authentication tag length of sealed data
pub const TAG_LENGTH: usize = 16;

/// Key identifier used by key transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyId {
    Master = 0,
    Authentication = 1,
    Encryption = 2,
}

impl KeyId {
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(KeyId::Master),
            1 => Ok(KeyId::Authentication),
            2 => Ok(KeyId::Encryption),
            _ => Err(DlmsError::RangeViolation(format!("key id {} not in 0..=2", id))),
        }
    }

    pub fn key_length(&self) -> usize {
        match self {
            KeyId::Master => MASTER_KEY_LENGTH,
            KeyId::Authentication => AUTHENTICATION_KEY_LENGTH,
            KeyId::Encryption => ENCRYPTION_KEY_LENGTH,
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyId::Master => "master",
            KeyId::Authentication => "authentication",
            KeyId::Encryption => "encryption",
        };
        f.write_str(name)
    }
}

struct KeySet {
    master: Vec<u8>,
    authentication: Vec<u8>,
    encryption: Vec<u8>,
    last_change: DateTime<Utc>,
}

impl KeySet {
    fn get(&self, id: KeyId) -> &[u8] {
        match id {
            KeyId::Master => &self.master,
            KeyId::Authentication => &self.authentication,
            KeyId::Encryption => &self.encryption,
        }
    }

    fn slot(&mut self, id: KeyId) -> &mut Vec<u8> {
        match id {
            KeyId::Master => &mut self.master,
            KeyId::Authentication => &mut self.authentication,
            KeyId::Encryption => &mut self.encryption,
        }
    }
}

pub struct KeyManager {
    keys: RwLock<KeySet>,
    audit: Arc<SecurityAuditLog>,
}

impl KeyManager {
    /// Create a manager with freshly generated random keys
    pub fn new(audit: Arc<SecurityAuditLog>) -> Self {
        Self {
            keys: RwLock::new(KeySet {
                master: random_key(MASTER_KEY_LENGTH),
                authentication: random_key(AUTHENTICATION_KEY_LENGTH),
                encryption: random_key(ENCRYPTION_KEY_LENGTH),
                last_change: Utc::now(),
            }),
            audit,
        }
    }

    /// Current key material; exposed for key transfer verification in tests
    /// and for the embedding application's persistence layer.
    pub async fn key(&self, id: KeyId) -> Vec<u8> {
        self.keys.read().await.get(id).to_vec()
    }

    /// Replace the authentication and encryption keys with random ones.
    /// The master key is left alone.
    pub async fn rotate_keys(&self) {
        {
            let mut keys = self.keys.write().await;
            keys.authentication = random_key(AUTHENTICATION_KEY_LENGTH);
            keys.encryption = random_key(ENCRYPTION_KEY_LENGTH);
            keys.last_change = Utc::now();
        }
        self.audit
            .record(SecurityEvent::new(
                SecurityEventKind::KeysRotated,
                "authentication and encryption keys rotated",
            ))
            .await;
    }

    /// Replace one key with transferred material.
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::Security`] if `key` does not have the length
    /// required for `id`.
    pub async fn transfer_key(&self, id: KeyId, key: &[u8]) -> DlmsResult<()> {
        if key.len() != id.key_length() {
            let error = DlmsError::Security(format!(
                "invalid {} key length: expected {} bytes, got {}",
                id,
                id.key_length(),
                key.len()
            ));
            self.audit
                .record(SecurityEvent::new(
                    SecurityEventKind::PolicyViolation,
                    error.to_string(),
                ))
                .await;
            return Err(error);
        }
        {
            let mut keys = self.keys.write().await;
            *keys.slot(id) = key.to_vec();
            keys.last_change = Utc::now();
        }
        self.audit
            .record(SecurityEvent::new(
                SecurityEventKind::KeyTransferred,
                format!("{} key replaced", id),
            ))
            .await;
        Ok(())
    }

    /// Encrypt `plaintext` with the encryption key.
    ///
    /// Output layout is `iv (12) | tag (16) | ciphertext`.
    pub async fn seal(&self, plaintext: &[u8], aad: &[u8]) -> DlmsResult<Vec<u8>> {
        let cipher = self.cipher().await?;
        let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, aad, &mut buffer)
            .map_err(|e| DlmsError::Security(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(IV_LENGTH + TAG_LENGTH + buffer.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&buffer);
        Ok(sealed)
    }

    /// Reverse of [`KeyManager::seal`]
    pub async fn open(&self, sealed: &[u8], aad: &[u8]) -> DlmsResult<Vec<u8>> {
        if sealed.len() < IV_LENGTH + TAG_LENGTH {
            return Err(DlmsError::Security(format!(
                "sealed data too short: {} bytes",
                sealed.len()
            )));
        }
        let (iv, rest) = sealed.split_at(IV_LENGTH);
        let (tag, ciphertext) = rest.split_at(TAG_LENGTH);

        let cipher = self.cipher().await?;
        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(iv), aad, &mut buffer, Tag::from_slice(tag))
            .map_err(|e| DlmsError::Security(format!("Decryption failed: {}", e)))?;
        Ok(buffer)
    }

    /// HMAC-SHA256 over `"{client_id}:{timestamp}"` with the authentication key
    pub async fn auth_token(&self, client_id: u16, timestamp: i64) -> DlmsResult<Vec<u8>> {
        let mac = self.token_mac(client_id, timestamp).await?;
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Constant-time verification of a token produced by [`KeyManager::auth_token`]
    pub async fn verify_auth_token(
        &self,
        token: &[u8],
        client_id: u16,
        timestamp: i64,
    ) -> DlmsResult<bool> {
        let mac = self.token_mac(client_id, timestamp).await?;
        Ok(mac.verify_slice(token).is_ok())
    }

    async fn token_mac(&self, client_id: u16, timestamp: i64) -> DlmsResult<HmacSha256> {
        let keys = self.keys.read().await;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&keys.authentication)
            .map_err(|e| DlmsError::Security(format!("Failed to create HMAC: {}", e)))?;
        mac.update(format!("{}:{}", client_id, timestamp).as_bytes());
        Ok(mac)
    }

    async fn cipher(&self) -> DlmsResult<Aes128Gcm> {
        let keys = self.keys.read().await;
        Aes128Gcm::new_from_slice(&keys.encryption)
            .map_err(|e| DlmsError::Security(format!("Invalid AES-128 key: {}", e)))
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}

fn random_key(length: usize) -> Vec<u8> {
    let mut key = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(Arc::new(SecurityAuditLog::default()))
    }

    #[tokio::test]
    async fn test_initial_key_lengths() {
        let keys = manager();
        assert_eq!(keys.key(KeyId::Master).await.len(), 32);
        assert_eq!(keys.key(KeyId::Authentication).await.len(), 16);
        assert_eq!(keys.key(KeyId::Encryption).await.len(), 16);
    }

    #[tokio::test]
    async fn test_seal_and_open() {
        let keys = manager();
        let sealed = keys.seal(b"C0 01 00 03", b"aad").await.unwrap();
        assert_eq!(sealed.len(), IV_LENGTH + TAG_LENGTH + 11);
        assert_eq!(keys.open(&sealed, b"aad").await.unwrap(), b"C0 01 00 03");
        assert!(keys.open(&sealed, b"other").await.is_err());
    }

    #[tokio::test]
    async fn test_rotation_invalidates_sealed_data() {
        let keys = manager();
        let master = keys.key(KeyId::Master).await;
        let sealed = keys.seal(b"reading", &[]).await.unwrap();
        keys.rotate_keys().await;

        assert!(keys.open(&sealed, &[]).await.is_err());
        assert_eq!(keys.key(KeyId::Master).await, master);
    }

    #[tokio::test]
    async fn test_transfer_key_checks_length() {
        let audit = Arc::new(SecurityAuditLog::default());
        let keys = KeyManager::new(audit.clone());
        keys.transfer_key(KeyId::Encryption, &[0x11; 16]).await.unwrap();
        assert_eq!(keys.key(KeyId::Encryption).await, vec![0x11; 16]);

        assert!(matches!(
            keys.transfer_key(KeyId::Master, &[0x22; 16]).await,
            Err(DlmsError::Security(_))
        ));
        assert_eq!(audit.count(SecurityEventKind::KeyTransferred).await, 1);
        assert_eq!(audit.count(SecurityEventKind::PolicyViolation).await, 1);
    }

    #[tokio::test]
    async fn test_auth_token() {
        let keys = manager();
        let token = keys.auth_token(16, 1_700_000_000).await.unwrap();
        assert_eq!(token.len(), 32);
        assert!(keys.verify_auth_token(&token, 16, 1_700_000_000).await.unwrap());
        assert!(!keys.verify_auth_token(&token, 17, 1_700_000_000).await.unwrap());
    }
}
