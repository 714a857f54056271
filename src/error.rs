// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Crate-level error composed from the per-module errors.

use serde::Serialize;
use thiserror::Error;

use crate::attr::CaptureError;
use crate::bridge::BridgeError;
use crate::config::ConfigError;
use crate::scenario::fixture::FixtureError;
use crate::scenario::ScriptError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no plugin module given on the command line or in the script")]
    NoPlugin,
}

/// Coarse class of an infrastructure error, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Module could not be loaded or resolved.
    Load,
    Plugin,
    Script,
    Capture,
    Fixture,
    Config,
}

impl HarnessError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarnessError::Bridge(BridgeError::Load { .. }) | HarnessError::NoPlugin => {
                ErrorCategory::Load
            }
            HarnessError::Bridge(_) => ErrorCategory::Plugin,
            HarnessError::Capture(_) => ErrorCategory::Capture,
            HarnessError::Script(_) => ErrorCategory::Script,
            HarnessError::Fixture(_) => ErrorCategory::Fixture,
            HarnessError::Config(_) => ErrorCategory::Config,
        }
    }
}
