use crate::types::SourceKind;
use thiserror::Error;

/// Authentication errors.
///
/// Cloneable so one refresh outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No credential stored for {0}")]
    NoCredential(SourceKind),

    #[error("Session for {0} has expired")]
    SessionExpired(SourceKind),

    #[error("Credential refresh for {kind} failed: {reason}")]
    RefreshFailed { kind: SourceKind, reason: String },

    #[error("Operation timed out: {operation} (after {timeout_secs}s)")]
    OperationTimeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("Credential refresh was cancelled")]
    RefreshCancelled,

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored credential for {kind} is corrupted: {reason}")]
    CredentialCorrupted { kind: SourceKind, reason: String },

    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

impl AuthError {
    /// Whether a later attempt may succeed without the user signing in again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::OperationTimeout { .. }
                | AuthError::RefreshCancelled
                | AuthError::SecureStorageUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
