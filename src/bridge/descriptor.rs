// CLASSIFICATION: COMMUNITY
// Filename: descriptor.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Plugin self-description and declared capabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque token naming the plugin-side handler of an inbound capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerRef(pub u64);

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message kind the plugin accepts from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundCapability {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub config_keys: Vec<String>,
    pub handler: HandlerRef,
}

impl InboundCapability {
    pub fn accepts_key(&self, key: &str) -> bool {
        self.config_keys.iter().any(|k| k == key)
    }
}

/// Message kind the plugin emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCapability {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub inbound: Vec<InboundCapability>,
    #[serde(default)]
    pub outbound: Vec<OutboundCapability>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn with_inbound(
        mut self,
        name: impl Into<String>,
        version: u32,
        config_keys: &[&str],
        handler: HandlerRef,
    ) -> Self {
        self.inbound.push(InboundCapability {
            name: name.into(),
            version,
            config_keys: config_keys.iter().map(|k| k.to_string()).collect(),
            handler,
        });
        self
    }

    pub fn with_outbound(mut self, name: impl Into<String>, version: u32) -> Self {
        self.outbound.push(OutboundCapability {
            name: name.into(),
            version,
        });
        self
    }

    pub fn inbound(&self, name: &str) -> Option<&InboundCapability> {
        self.inbound.iter().find(|c| c.name == name)
    }

    pub fn outbound(&self, name: &str) -> Option<&OutboundCapability> {
        self.outbound.iter().find(|c| c.name == name)
    }
}
