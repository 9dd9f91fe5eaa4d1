//! Security policy and suite configuration for DLMS/COSEM

use dlms_core::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityPolicy {
    /// No encryption and authentication
    #[default]
    Nothing = 0,
    /// All messages to be authenticated
    Authenticated = 1,
    /// All messages to be encrypted
    Encrypted = 2,
    /// All messages to be authenticated and encrypted
    AuthenticatedAndEncrypted = 3,
}

impl SecurityPolicy {
    pub const ALL: [SecurityPolicy; 4] = [
        SecurityPolicy::Nothing,
        SecurityPolicy::Authenticated,
        SecurityPolicy::Encrypted,
        SecurityPolicy::AuthenticatedAndEncrypted,
    ];

    /// Get policy ID
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Get policy from ID
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(SecurityPolicy::Nothing),
            1 => Ok(SecurityPolicy::Authenticated),
            2 => Ok(SecurityPolicy::Encrypted),
            3 => Ok(SecurityPolicy::AuthenticatedAndEncrypted),
            _ => Err(DlmsError::RangeViolation(format!(
                "security policy {} not in 0..=3",
                id
            ))),
        }
    }

    /// Check if policy requires authentication
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            SecurityPolicy::Authenticated | SecurityPolicy::AuthenticatedAndEncrypted
        )
    }

    /// Check if policy requires encryption
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            SecurityPolicy::Encrypted | SecurityPolicy::AuthenticatedAndEncrypted
        )
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityPolicy::Nothing => "nothing",
            SecurityPolicy::Authenticated => "authenticated",
            SecurityPolicy::Encrypted => "encrypted",
            SecurityPolicy::AuthenticatedAndEncrypted => "authenticated and encrypted",
        };
        f.write_str(name)
    }
}

/// Security suite (cipher family used for protected APDUs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecuritySuite {
    /// AES-GCM-128 with GMAC authentication
    #[default]
    AesGcm128 = 0,
    /// ECDH-ECDSA, AES-GCM-128, SHA-256
    EcdhEcdsaAesGcm128Sha256 = 1,
    /// ECDH-ECDSA, AES-GCM-256, SHA-384
    EcdhEcdsaAesGcm256Sha384 = 2,
}

impl SecuritySuite {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(SecuritySuite::AesGcm128),
            1 => Ok(SecuritySuite::EcdhEcdsaAesGcm128Sha256),
            2 => Ok(SecuritySuite::EcdhEcdsaAesGcm256Sha384),
            _ => Err(DlmsError::RangeViolation(format!(
                "security suite {} not in 0..=2",
                id
            ))),
        }
    }

    /// Symmetric key length in bytes
    pub fn key_length(&self) -> usize {
        match self {
            SecuritySuite::AesGcm128 | SecuritySuite::EcdhEcdsaAesGcm128Sha256 => 16,
            SecuritySuite::EcdhEcdsaAesGcm256Sha384 => 32,
        }
    }
}

/// Authentication mechanism negotiated for an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthenticationMechanism {
    /// No authentication used
    #[default]
    None = 0,
    /// Authentication of the client by sending a shared password as secret
    Low = 1,
    /// High level security, manufacturer specific
    High = 2,
    HighMd5 = 3,
    HighSha1 = 4,
    /// Authentication of both client and meter using GMAC
    HighGmac = 5,
    HighSha256 = 6,
}

impl AuthenticationMechanism {
    /// Get mechanism ID
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Get mechanism from ID
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(AuthenticationMechanism::None),
            1 => Ok(AuthenticationMechanism::Low),
            2 => Ok(AuthenticationMechanism::High),
            3 => Ok(AuthenticationMechanism::HighMd5),
            4 => Ok(AuthenticationMechanism::HighSha1),
            5 => Ok(AuthenticationMechanism::HighGmac),
            6 => Ok(AuthenticationMechanism::HighSha256),
            _ => Err(DlmsError::RangeViolation(format!(
                "authentication mechanism {} not in 0..=6",
                id
            ))),
        }
    }

    /// Check if this is an HLS mechanism
    pub fn is_hls_mechanism(&self) -> bool {
        self.id() >= 2
    }
}
