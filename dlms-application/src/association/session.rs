//! Client sessions and the limits applied to them

use crate::association::state::AssociationState;
use chrono::{DateTime, Utc};
use dlms_security::{AuthenticationMechanism, SecurityPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Limits enforced by the association and connection managers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationLimits {
    /// Sessions open at the same time across all clients
    pub max_total_sessions: usize,
    /// Sessions open at the same time for one client
    pub max_sessions_per_client: usize,
    /// Idle time after which a session is ended
    pub session_timeout: Duration,
    /// Idle time after which a connection is closed
    pub connection_timeout: Duration,
}

impl Default for AssociationLimits {
    fn default() -> Self {
        Self {
            max_total_sessions: 100,
            max_sessions_per_client: 5,
            session_timeout: Duration::from_secs(5 * 60),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl AssociationLimits {
    pub fn with_max_total_sessions(mut self, max: usize) -> Self {
        self.max_total_sessions = max;
        self
    }

    pub fn with_max_sessions_per_client(mut self, max: usize) -> Self {
        self.max_sessions_per_client = max;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Parameters of an association request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub client_id: u16,
    pub peer_address: Option<SocketAddr>,
    pub authentication: AuthenticationMechanism,
    pub security_policy: SecurityPolicy,
}

impl SessionRequest {
    pub fn new(client_id: u16) -> Self {
        Self {
            client_id,
            peer_address: None,
            authentication: AuthenticationMechanism::None,
            security_policy: SecurityPolicy::Nothing,
        }
    }

    pub fn with_peer_address(mut self, address: SocketAddr) -> Self {
        self.peer_address = Some(address);
        self
    }

    pub fn with_authentication(mut self, mechanism: AuthenticationMechanism) -> Self {
        self.authentication = mechanism;
        self
    }

    pub fn with_security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.security_policy = policy;
        self
    }
}

/// One client session known to the [`AssociationManager`](crate::association::AssociationManager)
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationSession {
    pub session_id: u64,
    pub client_id: u16,
    pub peer_address: Option<SocketAddr>,
    pub authentication: AuthenticationMechanism,
    pub security_policy: SecurityPolicy,
    pub state: AssociationState,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AssociationSession {
    pub(crate) fn new(session_id: u64, request: SessionRequest, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            client_id: request.client_id,
            peer_address: request.peer_address,
            authentication: request.authentication,
            security_policy: request.security_policy,
            state: AssociationState::AssociationPending,
            start_time: now,
            last_activity: now,
        }
    }

    /// Time since the last activity, zero if `now` lies before it
    pub fn idle_time(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }

    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).to_std().unwrap_or_default()
    }
}
