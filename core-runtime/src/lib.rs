//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync core:
//! - Logging and tracing infrastructure
//! - Engine configuration
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the other `core-*` crates
//! depend on. It establishes the logging conventions, the configuration
//! builder and the typed event broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::SyncEngineConfig;
pub use error::{Error, Result};
