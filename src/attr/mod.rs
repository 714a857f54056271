// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Typed filesystem attribute model.
//!
//! An [`Attribute`] is one fact about one filesystem entry. A [`Snapshot`]
//! holds exactly the attribute kinds that were requested for a path; a kind
//! missing from the snapshot was not captured, it does not mean "false".

pub mod acl;
pub mod capture;
#[cfg(unix)]
mod unix;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use acl::{AclEntry, AclPerms, AclTag, Qualifier};
pub use capture::{capture, CaptureError};

/// Kind of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Socket,
    Fifo,
    CharSpecial,
    BlockSpecial,
    Whiteout,
    Unknown,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Regular => "regular",
            FileType::Directory => "directory",
            FileType::Symlink => "symlink",
            FileType::Socket => "socket",
            FileType::Fifo => "fifo",
            FileType::CharSpecial => "char-special",
            FileType::BlockSpecial => "block-special",
            FileType::Whiteout => "whiteout",
            FileType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Closed permission set. Bit values match the POSIX mode bits so native
    /// modes map onto the set by masking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: u16 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHER_READ = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXECUTE = 0o001;
        const SET_UID = 0o4000;
        const SET_GID = 0o2000;
        const STICKY = 0o1000;
    }
}

/// Errors from parsing a literal permission value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission literal {0:?}")]
pub struct PermissionParseError(pub String);

impl Permissions {
    /// Map a native mode onto the closed set, dropping file-type bits.
    pub fn from_mode(mode: u32) -> Self {
        Self::from_bits_truncate((mode & 0o7777) as u16)
    }

    /// Parse one flag name such as `owner-read` or `SET_UID`.
    pub fn from_flag_name(name: &str) -> Result<Self, PermissionParseError> {
        let normalized = name.trim().replace('-', "_").to_ascii_uppercase();
        Self::from_name(&normalized).ok_or_else(|| PermissionParseError(name.into()))
    }

    /// Parse `ls`-style notation (`rw-r--r--`, `rwsr-xr-t`).
    pub fn from_symbolic(text: &str) -> Result<Self, PermissionParseError> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() != 9 {
            return Err(PermissionParseError(text.into()));
        }
        let classes = [
            (Self::OWNER_READ, Self::OWNER_WRITE, Self::OWNER_EXECUTE, Self::SET_UID, 's'),
            (Self::GROUP_READ, Self::GROUP_WRITE, Self::GROUP_EXECUTE, Self::SET_GID, 's'),
            (Self::OTHER_READ, Self::OTHER_WRITE, Self::OTHER_EXECUTE, Self::STICKY, 't'),
        ];
        let mut perms = Self::empty();
        for (idx, (read, write, exec, special, special_char)) in classes.into_iter().enumerate() {
            let triple = &chars[idx * 3..idx * 3 + 3];
            match triple[0] {
                'r' => perms |= read,
                '-' => {}
                _ => return Err(PermissionParseError(text.into())),
            }
            match triple[1] {
                'w' => perms |= write,
                '-' => {}
                _ => return Err(PermissionParseError(text.into())),
            }
            match triple[2] {
                'x' => perms |= exec,
                '-' => {}
                c if c == special_char => perms |= exec | special,
                c if c == special_char.to_ascii_uppercase() => perms |= special,
                _ => return Err(PermissionParseError(text.into())),
            }
        }
        Ok(perms)
    }

    /// Parse an octal mode such as `0644` or `4755`.
    pub fn from_octal(text: &str) -> Result<Self, PermissionParseError> {
        let digits = text.trim_start_matches("0o");
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|mode| *mode <= 0o7777)
            .map(Self::from_mode)
            .ok_or_else(|| PermissionParseError(text.into()))
    }

    /// Render in `ls`-style notation.
    pub fn to_symbolic(self) -> String {
        let bit = |flag: Self, c: char| if self.contains(flag) { c } else { '-' };
        let special = |exec: Self, flag: Self, c: char| match (self.contains(exec), self.contains(flag)) {
            (true, true) => c,
            (false, true) => c.to_ascii_uppercase(),
            (true, false) => 'x',
            (false, false) => '-',
        };
        [
            bit(Self::OWNER_READ, 'r'),
            bit(Self::OWNER_WRITE, 'w'),
            special(Self::OWNER_EXECUTE, Self::SET_UID, 's'),
            bit(Self::GROUP_READ, 'r'),
            bit(Self::GROUP_WRITE, 'w'),
            special(Self::GROUP_EXECUTE, Self::SET_GID, 's'),
            bit(Self::OTHER_READ, 'r'),
            bit(Self::OTHER_WRITE, 'w'),
            special(Self::OTHER_EXECUTE, Self::STICKY, 't'),
        ]
        .iter()
        .collect()
    }

    /// Native mode bits for this set.
    pub fn mode(self) -> u32 {
        u32::from(self.bits())
    }
}

impl FromStr for Permissions {
    type Err = PermissionParseError;

    /// Accepts symbolic (`rw-r--r--`) or octal (`0644`) notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 9 && !s.chars().all(|c| c.is_ascii_digit()) {
            Self::from_symbolic(s)
        } else {
            Self::from_octal(s)
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_symbolic())
    }
}

/// Which owner an [`Identity`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityKind {
    User,
    Group,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentityKind::User => "user",
            IdentityKind::Group => "group",
        })
    }
}

/// Owning user or group of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: IdentityKind,
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampKind {
    Access,
    Modify,
    MetadataChange,
}

/// One entry timestamp in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub kind: TimestampKind,
    pub millis: i64,
}

/// Selector for one attribute variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeKind {
    FileType,
    Permissions,
    Identity(IdentityKind),
    Timestamp(TimestampKind),
    Acl,
}

impl AttributeKind {
    /// Every kind, in snapshot order.
    pub const ALL: [AttributeKind; 8] = [
        AttributeKind::FileType,
        AttributeKind::Permissions,
        AttributeKind::Identity(IdentityKind::User),
        AttributeKind::Identity(IdentityKind::Group),
        AttributeKind::Timestamp(TimestampKind::Access),
        AttributeKind::Timestamp(TimestampKind::Modify),
        AttributeKind::Timestamp(TimestampKind::MetadataChange),
        AttributeKind::Acl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttributeKind::FileType => "file-type",
            AttributeKind::Permissions => "permissions",
            AttributeKind::Identity(IdentityKind::User) => "owner",
            AttributeKind::Identity(IdentityKind::Group) => "group",
            AttributeKind::Timestamp(TimestampKind::Access) => "atime",
            AttributeKind::Timestamp(TimestampKind::Modify) => "mtime",
            AttributeKind::Timestamp(TimestampKind::MetadataChange) => "ctime",
            AttributeKind::Acl => "acl",
        }
    }

    /// Whether this kind is answered from the shared stat call.
    pub fn uses_metadata(self) -> bool {
        !matches!(self, AttributeKind::Acl)
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attribute kind {0:?}")]
pub struct UnknownAttributeKind(pub String);

impl FromStr for AttributeKind {
    type Err = UnknownAttributeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownAttributeKind(s.into()))
    }
}

impl TryFrom<String> for AttributeKind {
    type Error = UnknownAttributeKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttributeKind> for String {
    fn from(kind: AttributeKind) -> Self {
        kind.as_str().into()
    }
}

/// One captured fact about a filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Attribute {
    FileType(FileType),
    Permissions(Permissions),
    Identity(Identity),
    Timestamp(Timestamp),
    Acl(Vec<AclEntry>),
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::FileType(_) => AttributeKind::FileType,
            Attribute::Permissions(_) => AttributeKind::Permissions,
            Attribute::Identity(id) => AttributeKind::Identity(id.kind),
            Attribute::Timestamp(ts) => AttributeKind::Timestamp(ts.kind),
            Attribute::Acl(_) => AttributeKind::Acl,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::FileType(ft) => write!(f, "{ft}"),
            Attribute::Permissions(p) => write!(f, "{p}"),
            Attribute::Identity(id) => write!(f, "{}({})", id.name, id.id),
            Attribute::Timestamp(ts) => write!(f, "{}ms", ts.millis),
            Attribute::Acl(entries) => {
                let parts: Vec<String> = entries.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Immutable set of attributes captured for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    path: PathBuf,
    attributes: BTreeMap<AttributeKind, Attribute>,
}

impl Snapshot {
    pub(crate) fn new(path: &Path, attributes: Vec<Attribute>) -> Self {
        Self {
            path: path.to_path_buf(),
            attributes: attributes.into_iter().map(|a| (a.kind(), a)).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.attributes.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = AttributeKind> + '_ {
        self.attributes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
