// CLASSIFICATION: COMMUNITY
// Filename: acl.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! POSIX access control lists.
//!
//! On Linux the access ACL lives in the `system.posix_acl_access` extended
//! attribute. Entries are reported in the order the kernel stores them. A
//! file without an extended ACL reports the minimal three-entry ACL derived
//! from its mode, matching what `acl_get_file(3)` returns. Other platforms
//! report an empty ACL.

use std::fmt;
use std::io;
use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AclTag {
    User,
    Group,
    Mask,
    UserObj,
    GroupObj,
    Other,
}

impl AclTag {
    /// Only named user and group entries carry a qualifier.
    pub fn is_qualified(self) -> bool {
        matches!(self, AclTag::User | AclTag::Group)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AclPerms: u8 {
        const READ = 0b100;
        const WRITE = 0b010;
        const EXECUTE = 0b001;
    }
}

impl AclPerms {
    /// Parse `rwx`-style notation (`r-x`, `rw-`).
    pub fn from_symbolic(text: &str) -> Option<Self> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() != 3 {
            return None;
        }
        let mut perms = AclPerms::empty();
        for (c, (expected, flag)) in chars.iter().zip([
            ('r', AclPerms::READ),
            ('w', AclPerms::WRITE),
            ('x', AclPerms::EXECUTE),
        ]) {
            if *c == expected {
                perms |= flag;
            } else if *c != '-' {
                return None;
            }
        }
        Some(perms)
    }

    pub fn to_symbolic(self) -> String {
        let bit = |flag: AclPerms, c: char| if self.contains(flag) { c } else { '-' };
        [
            bit(AclPerms::READ, 'r'),
            bit(AclPerms::WRITE, 'w'),
            bit(AclPerms::EXECUTE, 'x'),
        ]
        .iter()
        .collect()
    }
}

/// Numeric id and resolved name of a named ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qualifier {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub tag: AclTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<Qualifier>,
    pub perms: AclPerms,
}

impl AclEntry {
    pub fn new(tag: AclTag, perms: AclPerms) -> Self {
        Self {
            tag,
            qualifier: None,
            perms,
        }
    }

    pub fn named(tag: AclTag, id: u32, name: impl Into<String>, perms: AclPerms) -> Self {
        Self {
            tag,
            qualifier: Some(Qualifier {
                id,
                name: name.into(),
            }),
            perms,
        }
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.tag {
            AclTag::User | AclTag::UserObj => "user",
            AclTag::Group | AclTag::GroupObj => "group",
            AclTag::Mask => "mask",
            AclTag::Other => "other",
        };
        let qualifier = self
            .qualifier
            .as_ref()
            .map(|q| q.name.as_str())
            .unwrap_or("");
        write!(f, "{tag}:{qualifier}:{}", self.perms.to_symbolic())
    }
}

/// Entries derived from mode bits when no extended ACL is present.
pub fn minimal_from_mode(mode: u32) -> Vec<AclEntry> {
    let perms = |shift: u32| AclPerms::from_bits_truncate(((mode >> shift) & 0o7) as u8);
    vec![
        AclEntry::new(AclTag::UserObj, perms(6)),
        AclEntry::new(AclTag::GroupObj, perms(3)),
        AclEntry::new(AclTag::Other, perms(0)),
    ]
}

/// Read the access ACL of `path`. `mode` supplies the minimal ACL when the
/// entry carries no extended one.
pub(crate) fn read(path: &Path, mode: u32) -> io::Result<Vec<AclEntry>> {
    #[cfg(target_os = "linux")]
    {
        match linux::read_xattr(path)? {
            Some(raw) => linux::resolve(linux::decode(&raw)?),
            None => Ok(minimal_from_mode(mode)),
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (path, mode);
        Ok(Vec::new())
    }
}

/// Replace the access ACL of `path` with `entries`.
///
/// A minimal ACL is folded into the mode bits by the kernel, so re-reading it
/// yields the same three entries.
pub fn apply(path: &Path, entries: &[AclEntry]) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        linux::write_xattr(path, &linux::encode(entries))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (path, entries);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ACLs are not supported on this platform",
        ))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{AclEntry, AclPerms, AclTag, Qualifier};
    use crate::attr::unix;
    use crate::attr::IdentityKind;
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    const XATTR_NAME: &[u8] = b"system.posix_acl_access\0";
    const ACL_EA_VERSION: u32 = 0x0002;
    const ACL_UNDEFINED_ID: u32 = u32::MAX;
    const ENTRY_LEN: usize = 8;

    const TAG_USER_OBJ: u16 = 0x01;
    const TAG_USER: u16 = 0x02;
    const TAG_GROUP_OBJ: u16 = 0x04;
    const TAG_GROUP: u16 = 0x08;
    const TAG_MASK: u16 = 0x10;
    const TAG_OTHER: u16 = 0x20;

    /// Entry as stored in the extended attribute, before name resolution.
    #[derive(Debug, PartialEq)]
    pub(super) struct RawEntry {
        pub tag: AclTag,
        pub id: Option<u32>,
        pub perms: AclPerms,
    }

    fn c_path(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    fn absent(err: &io::Error) -> bool {
        matches!(err.raw_os_error(), Some(libc::ENODATA) | Some(libc::ENOTSUP))
    }

    pub(super) fn read_xattr(path: &Path) -> io::Result<Option<Vec<u8>>> {
        let c_path = c_path(path)?;
        let name = XATTR_NAME.as_ptr() as *const libc::c_char;
        loop {
            // SAFETY: both strings are NUL terminated; a null buffer with
            // size 0 only queries the attribute length.
            let size = unsafe { libc::lgetxattr(c_path.as_ptr(), name, std::ptr::null_mut(), 0) };
            if size < 0 {
                let err = io::Error::last_os_error();
                return if absent(&err) { Ok(None) } else { Err(err) };
            }
            let mut buf = vec![0u8; size as usize];
            // SAFETY: `buf` is valid for `buf.len()` bytes.
            let read = unsafe {
                libc::lgetxattr(
                    c_path.as_ptr(),
                    name,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if read < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ERANGE) {
                    // grew between the two calls
                    continue;
                }
                return if absent(&err) { Ok(None) } else { Err(err) };
            }
            buf.truncate(read as usize);
            return Ok(Some(buf));
        }
    }

    pub(super) fn write_xattr(path: &Path, data: &[u8]) -> io::Result<()> {
        let c_path = c_path(path)?;
        // SAFETY: `data` is valid for `data.len()` bytes; strings are NUL terminated.
        let rc = unsafe {
            libc::setxattr(
                c_path.as_ptr(),
                XATTR_NAME.as_ptr() as *const libc::c_char,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn invalid(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, format!("malformed ACL xattr: {msg}"))
    }

    pub(super) fn decode(raw: &[u8]) -> io::Result<Vec<RawEntry>> {
        if raw.len() < 4 || (raw.len() - 4) % ENTRY_LEN != 0 {
            return Err(invalid("bad length"));
        }
        let version = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if version != ACL_EA_VERSION {
            return Err(invalid("unknown version"));
        }
        raw[4..]
            .chunks_exact(ENTRY_LEN)
            .map(|chunk| {
                let tag = u16::from_le_bytes([chunk[0], chunk[1]]);
                let perm = u16::from_le_bytes([chunk[2], chunk[3]]);
                let id = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                let tag = match tag {
                    TAG_USER_OBJ => AclTag::UserObj,
                    TAG_USER => AclTag::User,
                    TAG_GROUP_OBJ => AclTag::GroupObj,
                    TAG_GROUP => AclTag::Group,
                    TAG_MASK => AclTag::Mask,
                    TAG_OTHER => AclTag::Other,
                    _ => return Err(invalid("unknown tag")),
                };
                Ok(RawEntry {
                    tag,
                    id: (tag.is_qualified() && id != ACL_UNDEFINED_ID).then_some(id),
                    perms: AclPerms::from_bits_truncate(perm as u8),
                })
            })
            .collect()
    }

    pub(super) fn encode(entries: &[AclEntry]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + entries.len() * ENTRY_LEN);
        out.extend_from_slice(&ACL_EA_VERSION.to_le_bytes());
        for entry in entries {
            let tag = match entry.tag {
                AclTag::UserObj => TAG_USER_OBJ,
                AclTag::User => TAG_USER,
                AclTag::GroupObj => TAG_GROUP_OBJ,
                AclTag::Group => TAG_GROUP,
                AclTag::Mask => TAG_MASK,
                AclTag::Other => TAG_OTHER,
            };
            let id = entry
                .qualifier
                .as_ref()
                .map(|q| q.id)
                .unwrap_or(ACL_UNDEFINED_ID);
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&u16::from(entry.perms.bits()).to_le_bytes());
            out.extend_from_slice(&id.to_le_bytes());
        }
        out
    }

    /// Attach resolved names to qualified entries. An id without a name is an
    /// identity resolution failure, surfaced as `NotFound` with the id.
    pub(super) fn resolve(raw: Vec<RawEntry>) -> io::Result<Vec<AclEntry>> {
        raw.into_iter()
            .map(|entry| {
                let qualifier = match entry.id {
                    Some(id) => {
                        let kind = if entry.tag == AclTag::User {
                            IdentityKind::User
                        } else {
                            IdentityKind::Group
                        };
                        let name = unix::resolve_name(kind, id)?
                            .ok_or_else(|| super::unresolved(kind, id))?;
                        Some(Qualifier { id, name })
                    }
                    None => None,
                };
                Ok(AclEntry {
                    tag: entry.tag,
                    qualifier,
                    perms: entry.perms,
                })
            })
            .collect()
    }

}

/// Marker error for an id that has no name; the capture layer maps it to an
/// identity resolution failure.
#[derive(Debug, thiserror::Error)]
#[error("unresolved {kind} id {id}")]
pub(crate) struct Unresolved {
    pub kind: crate::attr::IdentityKind,
    pub id: u32,
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unresolved(kind: crate::attr::IdentityKind, id: u32) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, Unresolved { kind, id })
}
