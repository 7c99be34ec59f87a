//! Runtime handles.
//!
//! Exposes the Tokio runtime types so callers can detect whether they are
//! running inside a runtime (`Handle::try_current`) or build one for tests and
//! host entry points.

pub use tokio::runtime::{Builder, Handle, Runtime};
