//! Common error types for Jamlink

use thiserror::Error;

/// Common result type for Jamlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Jamlink collaboration engine
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing required input, rejected before any store call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// State machine rule violated (e.g. reviewing a terminal application)
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// An application from this applicant is already pending for the
    /// collaboration
    #[error("Applicant already has a pending application")]
    DuplicateApplication,

    /// A pending invitation for this musician already exists for the
    /// collaboration
    #[error("Musician already has a pending invitation")]
    DuplicatePendingInvitation,

    /// Target user is already on the roster (or holds an accepted invitation)
    #[error("User is already a participant")]
    AlreadyMember,

    /// Roster capacity reached; no further participants accepted
    #[error("Roster is full ({max} participants)")]
    RosterFull { max: u32 },

    /// Caller is not the applicant/invitee/creator the operation requires
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conditional write lost a race; retried internally before surfacing
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Transient infrastructure failure; retried internally before surfacing
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an `InvalidTransition` from any pair of displayable states.
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the failure is transient and the operation may be retried
    /// (lost conditional write or infrastructure hiccup). Validation and
    /// state-machine errors are terminal and must surface verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::StoreUnavailable(_))
    }
}
