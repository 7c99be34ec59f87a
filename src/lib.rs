//! Workspace facade crate.
//!
//! Host applications depend on `readsync-workspace` and get the composed sync
//! service with desktop defaults, without wiring each `core-*` crate by hand.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
