//! Session bookkeeping for associations
//!
//! The [`AssociationManager`] admits new sessions within the configured
//! [`AssociationLimits`], tracks their state and keeps aggregate statistics.

use crate::association::session::{AssociationLimits, AssociationSession, SessionRequest};
use crate::association::state::AssociationState;
use chrono::{DateTime, Utc};
use dlms_core::{DlmsError, DlmsResult};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Aggregate session statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatistics {
    /// Sessions ever started
    pub total_sessions: u64,
    /// Sessions currently open
    pub active_sessions: u64,
    /// Sessions that ended in the failed state
    pub failed_sessions: u64,
    /// Failures while the association was still pending
    pub authentication_failures: u64,
    /// Mean lifetime of the sessions ended so far
    pub average_session_duration: Duration,
    /// Sessions ended so far
    pub ended_sessions: u64,
}

impl SessionStatistics {
    fn record_duration(&mut self, duration: Duration) {
        self.ended_sessions += 1;
        let previous = self.average_session_duration.as_secs_f64();
        let average =
            previous + (duration.as_secs_f64() - previous) / self.ended_sessions as f64;
        self.average_session_duration = Duration::from_secs_f64(average);
    }
}

#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<u64, AssociationSession>,
    next_session_id: u64,
    statistics: SessionStatistics,
}

impl SessionTable {
    fn end(&mut self, session_id: u64, now: DateTime<Utc>) -> Option<AssociationSession> {
        let session = self.sessions.remove(&session_id)?;
        self.statistics.active_sessions = self.statistics.active_sessions.saturating_sub(1);
        self.statistics.record_duration(session.duration(now));
        Some(session)
    }
}

/// Session registry of the simulated meter
#[derive(Debug)]
pub struct AssociationManager {
    limits: AssociationLimits,
    table: Mutex<SessionTable>,
}

impl AssociationManager {
    pub fn new(limits: AssociationLimits) -> Self {
        Self {
            limits,
            table: Mutex::new(SessionTable {
                next_session_id: 1,
                ..SessionTable::default()
            }),
        }
    }

    pub fn limits(&self) -> &AssociationLimits {
        &self.limits
    }

    /// Open a session in the `AssociationPending` state.
    ///
    /// # Errors
    ///
    /// [`DlmsError::SessionLimitReached`] when either the total or the
    /// per-client session limit is reached.
    pub async fn start_session(&self, request: SessionRequest) -> DlmsResult<AssociationSession> {
        self.start_session_at(request, Utc::now()).await
    }

    pub async fn start_session_at(
        &self,
        request: SessionRequest,
        now: DateTime<Utc>,
    ) -> DlmsResult<AssociationSession> {
        let mut table = self.table.lock().await;
        if table.sessions.len() >= self.limits.max_total_sessions {
            log::warn!(
                "Rejecting session for client {}: {} sessions open",
                request.client_id,
                table.sessions.len()
            );
            return Err(DlmsError::SessionLimitReached(format!(
                "maximum of {} sessions reached",
                self.limits.max_total_sessions
            )));
        }
        let client_sessions = table
            .sessions
            .values()
            .filter(|session| session.client_id == request.client_id)
            .count();
        if client_sessions >= self.limits.max_sessions_per_client {
            log::warn!(
                "Rejecting session for client {}: {} sessions open for this client",
                request.client_id,
                client_sessions
            );
            return Err(DlmsError::SessionLimitReached(format!(
                "client {} already has {} sessions",
                request.client_id, client_sessions
            )));
        }

        let session_id = table.next_session_id;
        table.next_session_id += 1;
        let session = AssociationSession::new(session_id, request, now);
        table.sessions.insert(session_id, session.clone());
        table.statistics.total_sessions += 1;
        table.statistics.active_sessions += 1;
        log::debug!(
            "Session {} started for client {}",
            session_id,
            session.client_id
        );
        Ok(session)
    }

    /// Move a session to `state`.
    ///
    /// Moving to [`AssociationState::Failed`] counts the failure (and an
    /// authentication failure when the association was still pending) and
    /// ends the session.
    pub async fn update_session_state(
        &self,
        session_id: u64,
        state: AssociationState,
    ) -> DlmsResult<()> {
        self.update_session_state_at(session_id, state, Utc::now())
            .await
    }

    pub async fn update_session_state_at(
        &self,
        session_id: u64,
        state: AssociationState,
        now: DateTime<Utc>,
    ) -> DlmsResult<()> {
        let mut table = self.table.lock().await;
        let session = table
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        let previous = session.state;
        session.state = state;
        session.last_activity = now;
        log::debug!("Session {}: {} -> {}", session_id, previous, state);

        if state == AssociationState::Failed {
            table.statistics.failed_sessions += 1;
            if previous == AssociationState::AssociationPending {
                table.statistics.authentication_failures += 1;
            }
            table.end(session_id, now);
            log::warn!("Session {} failed while {}", session_id, previous);
        }
        Ok(())
    }

    /// Remove a session, returning it if it was open.
    pub async fn end_session(&self, session_id: u64) -> Option<AssociationSession> {
        self.end_session_at(session_id, Utc::now()).await
    }

    pub async fn end_session_at(
        &self,
        session_id: u64,
        now: DateTime<Utc>,
    ) -> Option<AssociationSession> {
        let ended = self.table.lock().await.end(session_id, now);
        if ended.is_some() {
            log::debug!("Session {} ended", session_id);
        }
        ended
    }

    /// Record activity on a session
    pub async fn touch(&self, session_id: u64) -> DlmsResult<()> {
        self.touch_at(session_id, Utc::now()).await
    }

    pub async fn touch_at(&self, session_id: u64, now: DateTime<Utc>) -> DlmsResult<()> {
        let mut table = self.table.lock().await;
        let session = table
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        session.last_activity = now;
        Ok(())
    }

    pub async fn session(&self, session_id: u64) -> Option<AssociationSession> {
        self.table.lock().await.sessions.get(&session_id).cloned()
    }

    pub async fn client_sessions(&self, client_id: u16) -> Vec<AssociationSession> {
        let table = self.table.lock().await;
        let mut sessions: Vec<_> = table
            .sessions
            .values()
            .filter(|session| session.client_id == client_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.session_id);
        sessions
    }

    /// End every session idle for longer than the session timeout.
    ///
    /// Returns the ids of the ended sessions.
    pub async fn cleanup_inactive(&self, now: DateTime<Utc>) -> Vec<u64> {
        let mut table = self.table.lock().await;
        let mut expired: Vec<u64> = table
            .sessions
            .values()
            .filter(|session| session.idle_time(now) > self.limits.session_timeout)
            .map(|session| session.session_id)
            .collect();
        expired.sort_unstable();
        for session_id in &expired {
            table.end(*session_id, now);
            log::info!("Session {} ended after inactivity", session_id);
        }
        expired
    }

    pub async fn statistics(&self) -> SessionStatistics {
        self.table.lock().await.statistics.clone()
    }
}

impl Default for AssociationManager {
    fn default() -> Self {
        Self::new(AssociationLimits::default())
    }
}

fn unknown_session(session_id: u64) -> DlmsError {
    DlmsError::InvalidState(format!("no open session with id {}", session_id))
}
