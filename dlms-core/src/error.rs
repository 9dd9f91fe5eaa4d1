use thiserror::Error;

/// Main error type for simulator operations
///
/// Object-level errors (invalid ids, type and range problems, read-only writes)
/// are returned to the immediate caller and leave session and link state alone.
/// Link-level errors force the HDLC link back to disconnected, see
/// [`DlmsError::is_link_failure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DlmsError {
    #[error("Invalid OBIS code: {0}")]
    InvalidObisCode(String),

    #[error("Invalid attribute id {attribute_id} for class {class_id}")]
    InvalidAttributeId { class_id: u16, attribute_id: u8 },

    #[error("Invalid method id {method_id} for class {class_id}")]
    InvalidMethodId { class_id: u16, method_id: u8 },

    #[error("Attribute {0} is read-only")]
    ReadOnlyViolation(u8),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Value out of range: {0}")]
    RangeViolation(String),

    #[error("No response within the response timeout")]
    ResponseTimeout,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error("Current time is outside every communication window")]
    OutsideCommunicationWindow,

    #[error("Session limit reached: {0}")]
    SessionLimitReached(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Security policy violation: {0}")]
    SecurityPolicyViolation(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Class mismatch for {logical_name}: expected {expected}, got {actual}")]
    ClassMismatch {
        logical_name: String,
        expected: u16,
        actual: u16,
    },

    #[error("Link closed while a request was pending")]
    LinkClosed,

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl DlmsError {
    /// Errors that tear down the HDLC link and fail the owning association.
    #[must_use]
    pub const fn is_link_failure(&self) -> bool {
        matches!(
            self,
            DlmsError::ResponseTimeout | DlmsError::UnexpectedResponse(_)
        )
    }

    /// Errors that must be written to the security audit trail.
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(
            self,
            DlmsError::AccessDenied(_) | DlmsError::SecurityPolicyViolation(_)
        )
    }
}

/// Result type alias for simulator operations
pub type DlmsResult<T> = Result<T, DlmsError>;
