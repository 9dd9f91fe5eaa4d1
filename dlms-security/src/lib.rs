//! Security module for DLMS/COSEM protocol
//!
//! This crate provides the security side of the simulator: security policies
//! and suites, per-client access rights with the checks that gate every COSEM
//! request, an audit trail of security events and the key material lifecycle.

pub mod access;
pub mod audit;
pub mod keys;
pub mod suite;

pub use access::{
    AccessControlManager, AccessLevel, AccessRight, InMemoryRightsRepository, RightsRepository,
};
pub use audit::{SECURITY_LOG_TARGET, SecurityAuditLog, SecurityEvent, SecurityEventKind};
pub use keys::{KeyId, KeyManager};
pub use suite::{AuthenticationMechanism, SecurityPolicy, SecuritySuite};
