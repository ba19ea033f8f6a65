//! Authorization error types.
//!
//! Internal layers return [`AuthzResult`]; the service and command layers fold
//! these into `bool` and status strings at their public boundary.

use rsperm_storage::StorageError;
use thiserror::Error;

/// Errors raised by the registry and the service internals.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Caller supplied a permission that is not declared in the config.
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// Caller named a group that is not declared in the config.
    #[error("unknown group: {group}")]
    UnknownGroup { group: String },

    /// Caller lacks delegation rights for the target.
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    /// The grant store failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

impl AuthzError {
    /// Returns true for expected, user-facing conditions (logged at warn, not error).
    pub fn is_validation(&self) -> bool {
        !matches!(self, AuthzError::StoreUnavailable(_))
    }
}

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;
