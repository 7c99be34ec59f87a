use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An engine setting is out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A per-source limiter override failed validation.
    #[error("Rate limit for '{source_kind}' is invalid: {reason}")]
    InvalidSourceRateLimit { source_kind: String, reason: String },

    /// A required host bridge was not supplied to the builder.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// The global tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
