use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    /// The platform secret store rejected or failed a call.
    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Stored value for '{key}' is malformed: {reason}")]
    Malformed { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
