//! # Authentication Module
//!
//! Session credentials for the authenticated reading sources.
//!
//! ## Overview
//!
//! The web sources (weRead, dedao) authenticate with session cookies that
//! expire without notice. This crate stores those credentials in the host
//! secure store and coordinates refreshes so concurrent sync workers never
//! trigger more than one refresh per source.
//!
//! ## Features
//!
//! - `SourceKind` identifiers shared by every sync component
//! - Secure credential storage via the platform `SecureStore`
//! - Single-flight refresh with timeout and cancellation
//! - Auth event emission on the core event bus

pub mod credential_store;
pub mod error;
pub mod refresh;
pub mod types;

pub use credential_store::CredentialStore;
pub use error::{AuthError, Result};
pub use refresh::{SingleFlightRefresh, DEFAULT_REFRESH_TIMEOUT};
pub use types::{Credential, SourceKind};
