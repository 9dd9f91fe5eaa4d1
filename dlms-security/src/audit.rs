//! Security audit trail
//!
//! Every security-relevant decision is logged under [`SECURITY_LOG_TARGET`]
//! and kept in a bounded in-memory log so tests and the embedding application
//! can inspect recent events.

use chrono::{DateTime, Utc};
use dlms_core::ObisCode;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::Mutex;

/// `log` target used for security events
pub const SECURITY_LOG_TARGET: &str = "dlms::security";

/// Default number of events kept in memory
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
    AccessGranted,
    AccessDenied,
    AccessRightsGranted,
    AccessRightsRevoked,
    KeyTransferred,
    KeysRotated,
    PolicyActivated,
    PolicyViolation,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::AccessGranted => "ACCESS_GRANTED",
            SecurityEventKind::AccessDenied => "ACCESS_DENIED",
            SecurityEventKind::AccessRightsGranted => "ACCESS_RIGHTS_GRANTED",
            SecurityEventKind::AccessRightsRevoked => "ACCESS_RIGHTS_REVOKED",
            SecurityEventKind::KeyTransferred => "KEY_TRANSFERRED",
            SecurityEventKind::KeysRotated => "KEYS_ROTATED",
            SecurityEventKind::PolicyActivated => "POLICY_ACTIVATED",
            SecurityEventKind::PolicyViolation => "POLICY_VIOLATION",
        }
    }

    fn is_denial(&self) -> bool {
        matches!(
            self,
            SecurityEventKind::AccessDenied | SecurityEventKind::PolicyViolation
        )
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: SecurityEventKind,
    pub client_id: Option<u16>,
    pub object: Option<ObisCode>,
    pub detail: String,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            client_id: None,
            object: None,
            detail: detail.into(),
        }
    }

    pub fn with_client(mut self, client_id: u16) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_object(mut self, object: ObisCode) -> Self {
        self.object = Some(object);
        self
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(client_id) = self.client_id {
            write!(f, " client={}", client_id)?;
        }
        if let Some(object) = self.object {
            write!(f, " object={}", object)?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// Bounded log of recent security events, oldest dropped first
#[derive(Debug)]
pub struct SecurityAuditLog {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl SecurityAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, event: SecurityEvent) {
        if event.kind.is_denial() {
            log::warn!(target: SECURITY_LOG_TARGET, "{}", event);
        } else {
            log::info!(target: SECURITY_LOG_TARGET, "{}", event);
        }

        let mut events = self.events.lock().await;
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the recorded events, oldest first
    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn count(&self, kind: SecurityEventKind) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_audit_log_is_bounded() {
        let log = SecurityAuditLog::new(2);
        log.record(SecurityEvent::new(SecurityEventKind::AccessGranted, "first")).await;
        log.record(SecurityEvent::new(SecurityEventKind::AccessDenied, "second")).await;
        log.record(SecurityEvent::new(SecurityEventKind::KeysRotated, "third")).await;

        let events = log.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "second");
        assert_eq!(log.count(SecurityEventKind::AccessGranted).await, 0);
    }

    #[test]
    fn test_event_display() {
        let event = SecurityEvent::new(SecurityEventKind::AccessDenied, "no rights")
            .with_client(16)
            .with_object(ObisCode::new(0, 0, 1, 0, 0, 255));
        assert_eq!(
            event.to_string(),
            "ACCESS_DENIED client=16 object=0.0.1.0.0.255: no rights"
        );
    }
}
