//! Association events
//!
//! Published by the [`AssociationService`](crate::service::AssociationService)
//! on a broadcast channel whenever an association is created, released or
//! fails.

use dlms_core::DlmsError;

/// An event that occurred on an association
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationEvent {
    /// A session and its connection were created
    Created {
        session_id: u64,
        connection_id: u64,
    },

    /// The association was released and its connections closed
    Released { session_id: u64 },

    /// A link failure marked the session failed
    Failed {
        session_id: u64,
        connection_id: u64,
        error: DlmsError,
    },
}

impl AssociationEvent {
    /// Event name as published to observers
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "association:created",
            Self::Released { .. } => "association:released",
            Self::Failed { .. } => "association:failed",
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            Self::Created { session_id, .. }
            | Self::Released { session_id }
            | Self::Failed { session_id, .. } => *session_id,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            Self::Created {
                session_id,
                connection_id,
            } => format!(
                "Association {} created on connection {}",
                session_id, connection_id
            ),
            Self::Released { session_id } => format!("Association {} released", session_id),
            Self::Failed {
                session_id,
                connection_id,
                error,
            } => format!(
                "Association {} failed on connection {}: {}",
                session_id, connection_id, error
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let created = AssociationEvent::Created {
            session_id: 1,
            connection_id: 7,
        };
        assert_eq!(created.name(), "association:created");
        assert_eq!(created.session_id(), 1);

        let failed = AssociationEvent::Failed {
            session_id: 2,
            connection_id: 8,
            error: DlmsError::ResponseTimeout,
        };
        assert_eq!(failed.name(), "association:failed");
        assert!(failed.is_failure());
        assert!(failed.description().contains("connection 8"));

        assert_eq!(
            AssociationEvent::Released { session_id: 3 }.name(),
            "association:released"
        );
    }
}
