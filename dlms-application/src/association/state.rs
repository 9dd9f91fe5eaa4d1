//! Association state for DLMS/COSEM sessions
//!
//! This module defines the states an application association between a
//! client and the simulated meter goes through, from the association request
//! until it is released or fails.

use dlms_core::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Association state of a client session
///
/// # State Transitions
///
/// ```text
///                 association request           release request
///                 ------------------            ---------------
///                |                  |          |               |
///                v                  v          v               v
/// Inactive -> AssociationPending -> Associated -> ReleasePending -> (ended)
///                     |                 |
///                     | link failure    | link failure
///                     v                 v
///                   Failed            Failed
/// ```
///
/// A session that reaches `Failed` is counted and ended by the
/// [`AssociationManager`](crate::association::AssociationManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AssociationState {
    /// No association exists
    #[default]
    Inactive = 0,

    /// Association establishment in progress
    ///
    /// Sessions start here. A failure in this state is counted as an
    /// authentication failure.
    AssociationPending = 1,

    /// Application association established
    ///
    /// GET, SET and ACTION requests are only served in this state.
    Associated = 2,

    /// Association release in progress
    ReleasePending = 3,

    /// The association failed, usually because its link went down
    Failed = 4,
}

impl AssociationState {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::AssociationPending),
            2 => Ok(Self::Associated),
            3 => Ok(Self::ReleasePending),
            4 => Ok(Self::Failed),
            _ => Err(DlmsError::InvalidData(format!(
                "Invalid association state: {}",
                id
            ))),
        }
    }

    /// Check if the association can serve COSEM requests
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Associated)
    }

    /// Check if the association is in a transitional state
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::AssociationPending | Self::ReleasePending)
    }

    /// Check if no further transition is possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "Inactive",
            Self::AssociationPending => "AssociationPending",
            Self::Associated => "Associated",
            Self::ReleasePending => "ReleasePending",
            Self::Failed => "Failed",
        }
    }
}

impl Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
