use bridge_traits::BridgeError;
use core_auth::AuthError;
use core_runtime::events::{ErrorSummary, FailureKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Session expired: {0}")]
    AuthExpired(String),

    #[error("Rate limited or blocked (status {status}): {message}")]
    RateLimited { status: i64, message: String },

    #[error("Remote API error {code}: {message}")]
    RemoteApi { code: i64, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{failed} of {total} units failed to sync")]
    PartialFailure { failed: u32, total: u32 },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },
}

impl SyncError {
    /// Classify the error into the shared failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Network(_) | SyncError::Cancelled => FailureKind::NetworkTransient,
            SyncError::AuthExpired(_) => FailureKind::AuthExpired,
            SyncError::RateLimited { .. } => FailureKind::RateLimitedOrBlocked,
            SyncError::RemoteApi { .. } | SyncError::PartialFailure { .. } => {
                FailureKind::RemoteApiError
            }
            SyncError::Persistence(_) | SyncError::InvalidStateTransition { .. } => {
                FailureKind::LocalPersistenceError
            }
            SyncError::ConfigurationMissing(_) => FailureKind::ConfigurationMissing,
            SyncError::Auth(auth) => match auth {
                AuthError::NoCredential(_)
                | AuthError::SessionExpired(_)
                | AuthError::RefreshFailed { .. }
                | AuthError::CredentialCorrupted { .. } => FailureKind::AuthExpired,
                AuthError::OperationTimeout { .. } | AuthError::RefreshCancelled => {
                    FailureKind::NetworkTransient
                }
                AuthError::SecureStorageUnavailable(_) => FailureKind::LocalPersistenceError,
                AuthError::InvalidSource(_) => FailureKind::ConfigurationMissing,
            },
        }
    }

    /// Summary carried by `failed` events and job error info.
    pub fn summary(&self) -> ErrorSummary {
        let summary = ErrorSummary::new(self.kind(), self.to_string());
        match self {
            SyncError::RateLimited { status, .. } => summary.with_code(*status),
            SyncError::RemoteApi { code, .. } => summary.with_code(*code),
            SyncError::PartialFailure { failed, total } => summary.with_details(format!(
                "{} synced, {} failed; retry to sync the remaining units",
                total.saturating_sub(*failed),
                failed
            )),
            _ => summary,
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(e: BridgeError) -> Self {
        SyncError::Persistence(e.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Persistence(format!("Malformed sync record: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use core_auth::SourceKind;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SyncError::Network("reset".into()).kind(),
            FailureKind::NetworkTransient
        );
        assert_eq!(
            SyncError::RateLimited {
                status: 429,
                message: "slow down".into()
            }
            .kind(),
            FailureKind::RateLimitedOrBlocked
        );
        assert_eq!(
            SyncError::Auth(AuthError::SessionExpired(SourceKind::WeRead)).kind(),
            FailureKind::AuthExpired
        );
        assert_eq!(
            SyncError::Auth(AuthError::OperationTimeout {
                operation: "credential refresh".into(),
                timeout_secs: 15
            })
            .kind(),
            FailureKind::NetworkTransient
        );
        assert_eq!(
            SyncError::ConfigurationMissing("destination".into()).kind(),
            FailureKind::ConfigurationMissing
        );
    }

    #[test]
    fn test_summary_carries_codes_and_details() {
        let summary = SyncError::RemoteApi {
            code: -2003,
            message: "bad request".into(),
        }
        .summary();
        assert_eq!(summary.kind, FailureKind::RemoteApiError);
        assert_eq!(summary.code, Some(-2003));

        let partial = SyncError::PartialFailure {
            failed: 2,
            total: 10,
        }
        .summary();
        assert_eq!(partial.message, "2 of 10 units failed to sync");
        assert!(partial.details.unwrap().contains("8 synced"));
    }

    #[test]
    fn test_bridge_errors_are_persistence_failures() {
        let err: SyncError = BridgeError::DatabaseError("disk full".into()).into();
        assert_eq!(err.kind(), FailureKind::LocalPersistenceError);
    }
}
