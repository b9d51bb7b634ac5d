//! crates/ride_share_core/src/error.rs
//!
//! Typed failures returned by the core services. Conflict variants are
//! expected outcomes of concurrent use; callers refresh their view instead of
//! retrying.

use crate::domain::RideStatus;
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed or missing input. Never retried automatically.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthRequired,

    /// The actor lacks the role or ownership the operation needs.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Another driver claimed the ride first, or it is no longer pending.
    #[error("Ride has already been taken")]
    AlreadyTaken,

    #[error("Ride status changed concurrently: expected {expected}, found {actual}")]
    PreconditionFailed {
        expected: RideStatus,
        actual: RideStatus,
    },

    #[error("Operation not allowed while ride is {0}")]
    InvalidState(RideStatus),

    /// The actor has no active tracking session.
    #[error("Location tracking is not active")]
    TrackingInactive,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient backend failure. One-shot operations surface it for a manual retry.
    #[error("Backend unavailable: {0}")]
    Connectivity(String),

    #[error("An unexpected error occurred: {0}")]
    Internal(String),
}

impl CoreError {
    /// Conflicts are normal results of concurrent use, not faults.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::AlreadyTaken | CoreError::PreconditionFailed { .. }
        )
    }

    /// A stable machine-readable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::AuthRequired => "auth_required",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::AlreadyTaken => "already_taken",
            CoreError::PreconditionFailed { .. } => "precondition_failed",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::TrackingInactive => "tracking_inactive",
            CoreError::NotFound(_) => "not_found",
            CoreError::Connectivity(_) => "connectivity_error",
            CoreError::Internal(_) => "internal_error",
        }
    }
}

impl From<PortError> for CoreError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => CoreError::NotFound(what),
            PortError::PreconditionFailed { expected, actual } => {
                CoreError::PreconditionFailed { expected, actual }
            }
            PortError::Unauthorized => CoreError::AuthRequired,
            PortError::Connectivity(msg) => CoreError::Connectivity(msg),
            PortError::Unexpected(msg) => CoreError::Internal(msg),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
