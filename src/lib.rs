// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v2.0
// Date Modified: 2026-10-16
// Author: Lukas Bower

//! Black-box conformance harness for host-agent monitoring plugins.
//!
//! A plugin is loaded through the [`bridge`], driven by a declarative
//! [`scenario`] script, and judged on the [`parcel`]s it emits and the
//! filesystem [`attr`]ibutes it is meant to observe.

/// Filesystem attribute model and capture
pub mod attr;

/// Plugin loading, ABI and the capture channel
pub mod bridge;

/// Harness configuration and host settings
pub mod config;

/// Crate-level error and categories
pub mod error;

/// Parcel model and stream validation
pub mod parcel;

/// Script parsing, fixtures, expectations and the driver
pub mod scenario;

pub use error::HarnessError;
pub use scenario::{Report, ScenarioDriver, Verdict};
