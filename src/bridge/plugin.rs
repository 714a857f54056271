// CLASSIFICATION: COMMUNITY
// Filename: plugin.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! The plugin lifecycle contract.

use thiserror::Error;

use super::channel::HostApi;
use super::descriptor::{Descriptor, HandlerRef};
use crate::config::Settings;

/// Failure reported by a plugin entry point.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("handler {handler} rejected request with code {code}")]
    Rejected { handler: HandlerRef, code: i32 },
    #[error("entry point `{0}` is not provided")]
    NotProvided(&'static str),
    #[error("{0}")]
    Other(String),
}

/// A monitoring plugin as the host agent sees it.
///
/// `start` is called once, `status` any number of times after it, and `stop`
/// exactly once to end the lifecycle. `deliver` routes a request to the
/// handler the plugin declared for one of its inbound capabilities. The
/// plugin emits parcels only through the [`HostApi`] it receives at start.
pub trait Plugin: Send {
    fn start(&mut self, host: HostApi, settings: &Settings) -> Result<Descriptor, PluginError>;

    fn status(&mut self) -> Result<Descriptor, PluginError>;

    fn deliver(
        &mut self,
        handler: HandlerRef,
        request: &serde_json::Value,
    ) -> Result<(), PluginError>;

    fn stop(&mut self) -> Result<(), PluginError>;
}
