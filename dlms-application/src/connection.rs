//! Connections and the HDLC links they own
//!
//! Every connection belongs to one session and owns one [`HdlcLink`]. A
//! forwarding task per connection keeps the connection counters in step with
//! the link's events and hands each event on to a [`LinkEventSink`].
//! Closing a connection aborts its link, which completes every pending
//! request with [`DlmsError::LinkClosed`] and cancels its response timers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlms_core::{DlmsError, DlmsResult};
use dlms_session::{HdlcAddress, HdlcConfig, HdlcEvent, HdlcFrame, HdlcLink};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};

/// Receiver of the events of every managed link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkEventSink: Send + Sync {
    async fn link_event(&self, connection_id: u64, session_id: u64, event: HdlcEvent);
}

/// Snapshot of one connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub connection_id: u64,
    pub session_id: u64,
    pub remote_address: HdlcAddress,
    pub is_connected: bool,
    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub error_count: u64,
}

impl ConnectionInfo {
    pub fn idle_time(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }
}

/// Aggregate connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatistics {
    pub total_connections: u64,
    pub active_connections: u64,
    /// Connections whose link failed
    pub failed_connections: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

struct Connection {
    info: ConnectionInfo,
    link: Arc<HdlcLink>,
    outbound: Option<mpsc::UnboundedReceiver<HdlcFrame>>,
    /// Dropping this stops the forwarding task
    _shutdown: oneshot::Sender<()>,
}

#[derive(Default)]
struct ConnectionTable {
    connections: HashMap<u64, Connection>,
    next_connection_id: u64,
    statistics: ConnectionStatistics,
}

impl ConnectionTable {
    fn apply(&mut self, connection_id: u64, event: &HdlcEvent, now: DateTime<Utc>) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };
        let info = &mut connection.info;
        info.last_activity = now;
        match event {
            HdlcEvent::Connected => {
                if !info.is_connected {
                    info.is_connected = true;
                    self.statistics.active_connections += 1;
                }
            }
            HdlcEvent::Disconnected => {
                if info.is_connected {
                    info.is_connected = false;
                    self.statistics.active_connections =
                        self.statistics.active_connections.saturating_sub(1);
                }
            }
            HdlcEvent::Error(_) => {
                info.error_count += 1;
                self.statistics.errors += 1;
                self.statistics.failed_connections += 1;
            }
            _ => {}
        }
    }

    fn remove(&mut self, connection_id: u64) -> Option<Connection> {
        let connection = self.connections.remove(&connection_id)?;
        if connection.info.is_connected {
            self.statistics.active_connections =
                self.statistics.active_connections.saturating_sub(1);
        }
        Some(connection)
    }
}

/// Registry of the open connections
pub struct ConnectionManager {
    connection_timeout: Duration,
    table: Arc<Mutex<ConnectionTable>>,
}

impl ConnectionManager {
    pub fn new(connection_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            table: Arc::new(Mutex::new(ConnectionTable {
                next_connection_id: 1,
                ..ConnectionTable::default()
            })),
        }
    }

    /// Create a connection for `session_id` with a fresh, disconnected link.
    ///
    /// The link's events are applied to the connection and then passed to
    /// `sink` for as long as the connection stays open.
    pub async fn create_connection(
        &self,
        session_id: u64,
        config: HdlcConfig,
        sink: Weak<dyn LinkEventSink>,
    ) -> ConnectionInfo {
        let now = Utc::now();
        let remote_address = config.remote_address;
        let (link, channels) = HdlcLink::new(config);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut table = self.table.lock().await;
        let connection_id = table.next_connection_id;
        table.next_connection_id += 1;
        let info = ConnectionInfo {
            connection_id,
            session_id,
            remote_address,
            is_connected: false,
            opened_at: now,
            last_activity: now,
            bytes_received: 0,
            bytes_sent: 0,
            error_count: 0,
        };
        table.connections.insert(
            connection_id,
            Connection {
                info: info.clone(),
                link: Arc::new(link),
                outbound: Some(channels.outbound),
                _shutdown: shutdown_tx,
            },
        );
        table.statistics.total_connections += 1;
        drop(table);

        tokio::spawn(forward_events(
            Arc::downgrade(&self.table),
            sink,
            connection_id,
            session_id,
            channels.events,
            shutdown_rx,
        ));
        log::debug!(
            "Connection {} created for session {} with peer {}",
            connection_id,
            session_id,
            remote_address
        );
        info
    }

    pub async fn connection(&self, connection_id: u64) -> Option<ConnectionInfo> {
        let table = self.table.lock().await;
        table.connections.get(&connection_id).map(|c| c.info.clone())
    }

    pub async fn link(&self, connection_id: u64) -> Option<Arc<HdlcLink>> {
        let table = self.table.lock().await;
        table.connections.get(&connection_id).map(|c| c.link.clone())
    }

    /// Hand out the frames the link wants transmitted. Only the first call
    /// for a connection returns the receiver.
    pub async fn take_outbound(
        &self,
        connection_id: u64,
    ) -> Option<mpsc::UnboundedReceiver<HdlcFrame>> {
        let mut table = self.table.lock().await;
        table
            .connections
            .get_mut(&connection_id)
            .and_then(|c| c.outbound.take())
    }

    /// Feed raw bytes from the transport into the connection's link.
    ///
    /// Undecodable input counts as a connection error.
    pub async fn receive_bytes(&self, connection_id: u64, raw: &[u8]) -> DlmsResult<()> {
        let link = {
            let mut table = self.table.lock().await;
            let connection = table
                .connections
                .get_mut(&connection_id)
                .ok_or_else(|| unknown_connection(connection_id))?;
            connection.info.bytes_received += raw.len() as u64;
            connection.info.last_activity = Utc::now();
            let link = connection.link.clone();
            table.statistics.bytes_received += raw.len() as u64;
            link
        };

        let result = link.handle_bytes(raw).await;
        if result.is_err() {
            let mut table = self.table.lock().await;
            if let Some(connection) = table.connections.get_mut(&connection_id) {
                connection.info.error_count += 1;
                table.statistics.errors += 1;
            }
        }
        result
    }

    /// Count bytes written to the transport for a connection
    pub async fn record_bytes_sent(&self, connection_id: u64, count: usize) -> DlmsResult<()> {
        let mut table = self.table.lock().await;
        let connection = table
            .connections
            .get_mut(&connection_id)
            .ok_or_else(|| unknown_connection(connection_id))?;
        connection.info.bytes_sent += count as u64;
        connection.info.last_activity = Utc::now();
        table.statistics.bytes_sent += count as u64;
        Ok(())
    }

    pub async fn session_connections(&self, session_id: u64) -> Vec<ConnectionInfo> {
        let table = self.table.lock().await;
        let mut connections: Vec<_> = table
            .connections
            .values()
            .filter(|c| c.info.session_id == session_id)
            .map(|c| c.info.clone())
            .collect();
        connections.sort_by_key(|c| c.connection_id);
        connections
    }

    /// Whether any connection of `session_id` has its link in the connected state
    pub async fn has_connected_link(&self, session_id: u64) -> bool {
        let links: Vec<Arc<HdlcLink>> = {
            let table = self.table.lock().await;
            table
                .connections
                .values()
                .filter(|c| c.info.session_id == session_id)
                .map(|c| c.link.clone())
                .collect()
        };
        for link in links {
            if link.state().await.is_connected() {
                return true;
            }
        }
        false
    }

    /// Close a connection and abort its link. Returns false if it was unknown.
    pub async fn close_connection(&self, connection_id: u64) -> bool {
        let removed = self.table.lock().await.remove(connection_id);
        match removed {
            Some(connection) => {
                connection.link.abort().await;
                log::debug!("Connection {} closed", connection_id);
                true
            }
            None => false,
        }
    }

    /// Close every connection of a session, returning how many were closed
    pub async fn close_session_connections(&self, session_id: u64) -> usize {
        let removed: Vec<Connection> = {
            let mut table = self.table.lock().await;
            let ids: Vec<u64> = table
                .connections
                .values()
                .filter(|c| c.info.session_id == session_id)
                .map(|c| c.info.connection_id)
                .collect();
            ids.into_iter().filter_map(|id| table.remove(id)).collect()
        };
        for connection in &removed {
            connection.link.abort().await;
        }
        if !removed.is_empty() {
            log::debug!(
                "Closed {} connection(s) of session {}",
                removed.len(),
                session_id
            );
        }
        removed.len()
    }

    /// Close every connection idle for longer than the connection timeout.
    ///
    /// Returns the ids of the closed connections.
    pub async fn cleanup_inactive(&self, now: DateTime<Utc>) -> Vec<u64> {
        let removed: Vec<Connection> = {
            let mut table = self.table.lock().await;
            let mut ids: Vec<u64> = table
                .connections
                .values()
                .filter(|c| c.info.idle_time(now) > self.connection_timeout)
                .map(|c| c.info.connection_id)
                .collect();
            ids.sort_unstable();
            ids.into_iter().filter_map(|id| table.remove(id)).collect()
        };
        let mut closed = Vec::with_capacity(removed.len());
        for connection in removed {
            connection.link.abort().await;
            log::info!(
                "Connection {} closed after inactivity",
                connection.info.connection_id
            );
            closed.push(connection.info.connection_id);
        }
        closed
    }

    pub async fn statistics(&self) -> ConnectionStatistics {
        self.table.lock().await.statistics.clone()
    }
}

async fn forward_events(
    table: Weak<Mutex<ConnectionTable>>,
    sink: Weak<dyn LinkEventSink>,
    connection_id: u64,
    session_id: u64,
    mut events: mpsc::UnboundedReceiver<HdlcEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(table) = table.upgrade() else {
            break;
        };
        table.lock().await.apply(connection_id, &event, Utc::now());
        drop(table);

        if let HdlcEvent::Error(error) = &event {
            log::warn!("Connection {} link failed: {}", connection_id, error);
        }
        match sink.upgrade() {
            Some(sink) => sink.link_event(connection_id, session_id, event).await,
            None => log::debug!("Connection {} event dropped, no listener", connection_id),
        }
    }
    log::trace!("Connection {} event forwarding stopped", connection_id);
}

fn unknown_connection(connection_id: u64) -> DlmsError {
    DlmsError::InvalidState(format!("no open connection with id {}", connection_id))
}
