// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Parcels: the discrete messages a plugin emits to the host.

pub mod stream;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use stream::{StreamValidator, StreamViolation};

/// Payload compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
    Lz4,
}

impl Compression {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Zstd),
            3 => Some(Compression::Lz4),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Zstd => 2,
            Compression::Lz4 => 3,
        }
    }
}

/// `(major, minor)` ordering stamp. Ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Sequence {
    pub major: u64,
    pub minor: u64,
}

impl Sequence {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Part,
    Last,
}

/// Membership of a parcel in a multi-parcel unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub disposition: Disposition,
}

/// One message emitted by a plugin. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    time: DateTime<Utc>,
    sender: String,
    recipient: String,
    #[serde(rename = "type")]
    kind: String,
    compression: Compression,
    sequence: Sequence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<Group>,
    #[serde(default)]
    payload: Vec<u8>,
}

impl Parcel {
    /// Start a parcel stamped with the current time, no group, no payload.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: impl Into<String>,
        sequence: Sequence,
    ) -> Self {
        Self {
            time: Utc::now(),
            sender: sender.into(),
            recipient: recipient.into(),
            kind: kind.into(),
            compression: Compression::None,
            sequence,
            group: None,
            payload: Vec::new(),
        }
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_group(mut self, id: u64, disposition: Disposition) -> Self {
        self.group = Some(Group { id, disposition });
        self
    }

    pub fn with_payload(mut self, compression: Compression, payload: impl Into<Vec<u8>>) -> Self {
        self.compression = compression;
        self.payload = payload.into();
        self
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// The parcel `type`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn group(&self) -> Option<Group> {
        self.group
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, only when uncompressed and valid UTF-8.
    pub fn payload_text(&self) -> Option<&str> {
        match self.compression {
            Compression::None => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} type={} seq={}",
            self.sender, self.recipient, self.kind, self.sequence
        )?;
        if let Some(group) = self.group {
            write!(f, " group={}:{:?}", group.id, group.disposition)?;
        }
        write!(f, " payload={}B", self.payload.len())
    }
}
