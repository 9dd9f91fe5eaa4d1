//! Association service
//!
//! Ties sessions to connections: an association request opens a session and
//! a connection for it, the session becomes associated once the peer brings
//! the HDLC link up, releasing the association closes both, and a failing
//! link marks its session failed.
//!
//! With an object registry attached, every client with an open session also
//! gets an Association LN object (0-0:40.0.<client>.255) that lives exactly as
//! long as the client's sessions.

use crate::association::{
    AssociationEvent, AssociationLimits, AssociationManager, AssociationSession, AssociationState,
    SessionRequest, SessionStatistics,
};
use crate::connection::{ConnectionInfo, ConnectionManager, ConnectionStatistics, LinkEventSink};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dlms_core::{DlmsError, DlmsResult};
use dlms_interface::{AssociationLn, AssociationStatus, CosemObject, ObjectRegistry};
use dlms_session::{HdlcConfig, HdlcEvent};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock, broadcast};

const EVENT_CAPACITY: usize = 64;

/// Consumer of the APDUs an associated session receives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApduHandler: Send + Sync {
    /// Handle one APDU from `session_id`.
    ///
    /// # Returns
    ///
    /// The APDU to send back to the peer, if any.
    async fn handle_apdu(&self, session_id: u64, apdu: Bytes) -> DlmsResult<Option<Bytes>>;
}

/// Identifiers handed out for an accepted association request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationHandle {
    pub session_id: u64,
    pub connection_id: u64,
}

/// A session together with its connections
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session: Option<AssociationSession>,
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatistics {
    pub associations: SessionStatistics,
    pub connections: ConnectionStatistics,
}

/// Coordinates the [`AssociationManager`] and the [`ConnectionManager`]
pub struct AssociationService {
    associations: AssociationManager,
    connections: ConnectionManager,
    registry: Option<Arc<ObjectRegistry>>,
    /// Association LN object per client, present while the client has sessions
    association_objects: Mutex<HashMap<u16, Arc<AssociationLn>>>,
    apdu_handler: RwLock<Option<Arc<dyn ApduHandler>>>,
    events: broadcast::Sender<AssociationEvent>,
    this: Weak<AssociationService>,
}

impl AssociationService {
    /// Create a service without Association LN objects
    pub fn new(limits: AssociationLimits) -> Arc<Self> {
        Self::build(limits, None)
    }

    /// Create a service that keeps one Association LN object per associated
    /// client in `registry`
    pub fn with_registry(limits: AssociationLimits, registry: Arc<ObjectRegistry>) -> Arc<Self> {
        Self::build(limits, Some(registry))
    }

    fn build(limits: AssociationLimits, registry: Option<Arc<ObjectRegistry>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|this| Self {
            connections: ConnectionManager::new(limits.connection_timeout),
            associations: AssociationManager::new(limits),
            registry,
            association_objects: Mutex::new(HashMap::new()),
            apdu_handler: RwLock::new(None),
            events,
            this: this.clone(),
        })
    }

    /// Receive every association event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AssociationEvent> {
        self.events.subscribe()
    }

    pub fn associations(&self) -> &AssociationManager {
        &self.associations
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Route the APDUs of associated sessions to `handler`
    pub async fn set_apdu_handler(&self, handler: Arc<dyn ApduHandler>) {
        *self.apdu_handler.write().await = Some(handler);
    }

    /// Open a session and a connection for an association request.
    ///
    /// The session stays `AssociationPending` until the peer connects the
    /// link (SNRM/UA) or [`AssociationService::complete_association`] is
    /// called.
    ///
    /// # Arguments
    ///
    /// * `request` - Client SAP and negotiated security of the new session
    /// * `hdlc` - Parameters of the connection's HDLC link
    ///
    /// # Errors
    ///
    /// [`DlmsError::SessionLimitReached`] when the session limits are
    /// reached; no connection is created in that case.
    pub async fn handle_association_request(
        &self,
        request: SessionRequest,
        hdlc: HdlcConfig,
    ) -> DlmsResult<AssociationHandle> {
        let client_id = request.client_id;
        let session = self.associations.start_session(request).await?;
        let sink: Weak<dyn LinkEventSink> = self.this.clone();
        let connection = self
            .connections
            .create_connection(session.session_id, hdlc, sink)
            .await;
        self.sync_association_object(client_id).await;

        log::info!(
            "Association {} created for client {} on connection {}",
            session.session_id,
            client_id,
            connection.connection_id
        );
        self.publish(AssociationEvent::Created {
            session_id: session.session_id,
            connection_id: connection.connection_id,
        });
        Ok(AssociationHandle {
            session_id: session.session_id,
            connection_id: connection.connection_id,
        })
    }

    /// Mark a pending association as established
    pub async fn complete_association(&self, session_id: u64) -> DlmsResult<()> {
        let session = self.open_session(session_id).await?;
        if session.state != AssociationState::AssociationPending {
            return Err(DlmsError::InvalidState(format!(
                "association {} is {}, expected {}",
                session_id,
                session.state,
                AssociationState::AssociationPending
            )));
        }
        self.associations
            .update_session_state(session_id, AssociationState::Associated)
            .await?;
        self.sync_association_object(session.client_id).await;
        log::info!("Association {} established", session_id);
        Ok(())
    }

    /// Release an association: close its connections and end the session.
    pub async fn release_association(&self, session_id: u64) -> DlmsResult<()> {
        let session = self.open_session(session_id).await?;
        self.associations
            .update_session_state(session_id, AssociationState::ReleasePending)
            .await?;
        let closed = self.connections.close_session_connections(session_id).await;
        self.associations.end_session(session_id).await;
        self.sync_association_object(session.client_id).await;

        log::info!(
            "Association {} released, {} connection(s) closed",
            session_id,
            closed
        );
        self.publish(AssociationEvent::Released { session_id });
        Ok(())
    }

    /// Feed raw transport bytes into a connection's link.
    ///
    /// A pending association completes as soon as its link is connected.
    pub async fn receive_bytes(&self, connection_id: u64, raw: &[u8]) -> DlmsResult<()> {
        self.connections.receive_bytes(connection_id, raw).await?;
        if let Some(connection) = self.connections.connection(connection_id).await {
            if self.connections.has_connected_link(connection.session_id).await {
                self.link_up(connection.session_id).await;
            }
        }
        Ok(())
    }

    /// Check that a session's traffic can flow: the session is associated
    /// and one of its links is connected.
    ///
    /// # Returns
    ///
    /// The session, for its client id and security parameters.
    ///
    /// # Errors
    ///
    /// [`DlmsError::InvalidState`] otherwise.
    pub async fn serving_session(&self, session_id: u64) -> DlmsResult<AssociationSession> {
        let session = self.open_session(session_id).await?;
        if !session.state.is_active() {
            return Err(DlmsError::InvalidState(format!(
                "session {} is {}, not associated",
                session_id, session.state
            )));
        }
        if !self.connections.has_connected_link(session_id).await {
            return Err(DlmsError::InvalidState(format!(
                "session {} has no connected link",
                session_id
            )));
        }
        Ok(session)
    }

    /// Association LN object of `client_id`, while the client has sessions
    pub async fn association_object(&self, client_id: u16) -> Option<Arc<AssociationLn>> {
        self.association_objects.lock().await.get(&client_id).cloned()
    }

    pub async fn session_info(&self, session_id: u64) -> SessionInfo {
        SessionInfo {
            session: self.associations.session(session_id).await,
            connections: self.connections.session_connections(session_id).await,
        }
    }

    pub async fn statistics(&self) -> ServiceStatistics {
        ServiceStatistics {
            associations: self.associations.statistics().await,
            connections: self.connections.statistics().await,
        }
    }

    /// End idle sessions together with their connections, then close idle
    /// connections.
    pub async fn cleanup_inactive(&self, now: DateTime<Utc>) {
        for session_id in self.associations.cleanup_inactive(now).await {
            self.connections.close_session_connections(session_id).await;
        }
        self.connections.cleanup_inactive(now).await;

        let clients: Vec<u16> = self.association_objects.lock().await.keys().copied().collect();
        for client_id in clients {
            self.sync_association_object(client_id).await;
        }
    }

    async fn open_session(&self, session_id: u64) -> DlmsResult<AssociationSession> {
        self.associations
            .session(session_id)
            .await
            .ok_or_else(|| DlmsError::InvalidState(format!("no open session with id {}", session_id)))
    }

    /// Make the client's Association LN object match its open sessions
    async fn sync_association_object(&self, client_id: u16) {
        let Some(registry) = &self.registry else {
            return;
        };
        let mut objects = self.association_objects.lock().await;
        let sessions = self.associations.client_sessions(client_id).await;

        let Some(first) = sessions.first() else {
            if let Some(object) = objects.remove(&client_id) {
                registry.remove(&object.obis_code()).await;
                log::debug!("Association object {} removed", object.obis_code());
            }
            return;
        };

        let object = match objects.get(&client_id) {
            Some(object) => object.clone(),
            None => {
                let object = match AssociationLn::new(client_id, Arc::downgrade(registry)) {
                    Ok(object) => Arc::new(object),
                    Err(error) => {
                        log::debug!("Client {} gets no association object: {}", client_id, error);
                        return;
                    }
                };
                if let Err(error) = registry.register(object.clone()).await {
                    log::warn!("Association object for client {} not registered: {}", client_id, error);
                    return;
                }
                objects.insert(client_id, object.clone());
                object
            }
        };

        let status = if sessions.iter().any(|s| s.state.is_active()) {
            AssociationStatus::Associated
        } else {
            AssociationStatus::AssociationPending
        };
        object.set_authentication(first.authentication).await;
        object.set_status(status).await;
    }

    async fn link_up(&self, session_id: u64) {
        let pending = matches!(
            self.associations.session(session_id).await,
            Some(session) if session.state == AssociationState::AssociationPending
        );
        if pending {
            // a concurrent completion wins, nothing left to do
            if let Err(error) = self.complete_association(session_id).await {
                log::debug!("Association {} not completed: {}", session_id, error);
            }
        }
    }

    async fn link_down(&self, session_id: u64) {
        let associated = matches!(
            self.associations.session(session_id).await,
            Some(session) if session.state.is_active()
        );
        if associated {
            if let Err(error) = self.release_association(session_id).await {
                log::debug!("Association {} already released: {}", session_id, error);
            }
        }
    }

    async fn dispatch(&self, connection_id: u64, session_id: u64, apdu: Bytes) {
        let associated = matches!(
            self.associations.session(session_id).await,
            Some(session) if session.state.is_active()
        );
        if !associated {
            log::warn!(
                "Connection {} dropping {} byte APDU, session {} is not associated",
                connection_id,
                apdu.len(),
                session_id
            );
            return;
        }
        let Some(handler) = self.apdu_handler.read().await.clone() else {
            log::debug!("No APDU handler, {} bytes from session {} dropped", apdu.len(), session_id);
            return;
        };

        let reply = match handler.handle_apdu(session_id, apdu).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(error) => {
                log::warn!("Session {} APDU failed: {}", session_id, error);
                return;
            }
        };
        let Some(link) = self.connections.link(connection_id).await else {
            return;
        };
        let this = self.this.clone();
        // the reply waits for the peer's RR, which arrives through receive_bytes
        tokio::spawn(async move {
            let length = reply.len();
            match link.send_data(reply).await {
                Ok(()) => {
                    if let Some(service) = this.upgrade() {
                        let _ = service.connections.record_bytes_sent(connection_id, length).await;
                    }
                }
                Err(error) => log::warn!("Reply on connection {} failed: {}", connection_id, error),
            }
        });
    }

    async fn connection_failed(&self, connection_id: u64, session_id: u64, error: DlmsError) {
        let Some(session) = self.associations.session(session_id).await else {
            log::debug!(
                "Link failure on connection {} after session {} ended",
                connection_id,
                session_id
            );
            return;
        };
        if let Err(update_error) = self
            .associations
            .update_session_state(session_id, AssociationState::Failed)
            .await
        {
            log::debug!("Session {} already gone: {}", session_id, update_error);
        }
        self.connections.close_session_connections(session_id).await;
        self.sync_association_object(session.client_id).await;

        log::warn!(
            "Association {} failed on connection {}: {}",
            session_id,
            connection_id,
            error
        );
        self.publish(AssociationEvent::Failed {
            session_id,
            connection_id,
            error,
        });
    }

    fn publish(&self, event: AssociationEvent) {
        log::debug!("{}: {}", event.name(), event.description());
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl LinkEventSink for AssociationService {
    async fn link_event(&self, connection_id: u64, session_id: u64, event: HdlcEvent) {
        match event {
            HdlcEvent::Error(error) => {
                self.connection_failed(connection_id, session_id, error)
                    .await
            }
            HdlcEvent::Connected => {
                // the session may already be gone
                let _ = self.associations.touch(session_id).await;
                self.link_up(session_id).await;
            }
            HdlcEvent::Disconnected => self.link_down(session_id).await,
            HdlcEvent::DataReceived(apdu) => {
                let _ = self.associations.touch(session_id).await;
                self.dispatch(connection_id, session_id, apdu).await;
            }
            _ => {}
        }
    }
}
