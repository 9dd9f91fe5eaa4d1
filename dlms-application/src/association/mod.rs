//! Association module for DLMS/COSEM sessions
//!
//! This module provides the session side of application associations: the
//! association state machine, the sessions admitted by the
//! [`AssociationManager`] and the events published about them.
//!
//! # Association Lifecycle
//!
//! ```text
//!   association request                     release request
//!   -------------------                     ---------------
//!  |                   |                   |               |
//!  v                   v                   v               v
//! Inactive -> AssociationPending -> Associated -> ReleasePending -> (ended)
//!                     \                 /
//!                      \  link failure /
//!                       v             v
//!                          Failed
//! ```
//!
//! # Example
//!
//! ```rust
//! use dlms_application::association::{AssociationLimits, AssociationManager, SessionRequest};
//!
//! # async fn demo() -> dlms_core::DlmsResult<()> {
//! let manager = AssociationManager::new(AssociationLimits::default());
//! let session = manager.start_session(SessionRequest::new(16)).await?;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod manager;
pub mod session;
pub mod state;

pub use events::AssociationEvent;
pub use manager::{AssociationManager, SessionStatistics};
pub use session::{AssociationLimits, AssociationSession, SessionRequest};
pub use state::AssociationState;
