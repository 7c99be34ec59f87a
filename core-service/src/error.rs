use bridge_traits::BridgeError;
use core_runtime::events::FailureKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl CoreError {
    /// Failure class shown to the user for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::Sync(err) => err.kind(),
            CoreError::Auth(err) => core_sync::SyncError::Auth(err.clone()).kind(),
            CoreError::ConfigurationMissing(_) | CoreError::Runtime(_) => {
                FailureKind::ConfigurationMissing
            }
            CoreError::InitializationFailed(_) | CoreError::Bridge(_) => {
                FailureKind::LocalPersistenceError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
