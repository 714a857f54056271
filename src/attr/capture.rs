// CLASSIFICATION: COMMUNITY
// Filename: capture.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Attribute capture for one path.
//!
//! Every metadata-backed kind is answered from a single `lstat` so the
//! variants of one snapshot never disagree with each other.

use std::collections::BTreeSet;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use super::acl;
use super::{Attribute, AttributeKind, IdentityKind, Snapshot};
#[cfg(unix)]
use super::{Identity, Permissions, Timestamp};

/// Errors returned by [`capture`].
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The path does not exist. Scenarios may expect this.
    #[error("{}: no such file or directory", .0.display())]
    NotFound(PathBuf),
    /// The metadata query itself failed.
    #[error("metadata query failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot resolve {kind} id {id} for {}", path.display())]
    IdentityResolution {
        path: PathBuf,
        kind: IdentityKind,
        id: u32,
    },
    #[error("{kind} capture is not supported on this platform")]
    Unsupported { kind: AttributeKind },
}

impl CaptureError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CaptureError::NotFound(_))
    }
}

/// Capture the requested attribute kinds for `path` without following a
/// trailing symlink.
pub fn capture(path: &Path, kinds: &BTreeSet<AttributeKind>) -> Result<Snapshot, CaptureError> {
    let meta = fs::symlink_metadata(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => CaptureError::NotFound(path.to_path_buf()),
        _ => CaptureError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let mut attributes = Vec::with_capacity(kinds.len());
    for kind in kinds {
        attributes.push(decode(path, &meta, *kind)?);
    }
    debug!("captured {} attribute(s) for {}", attributes.len(), path.display());
    Ok(Snapshot::new(path, attributes))
}

#[cfg(unix)]
fn decode(path: &Path, meta: &Metadata, kind: AttributeKind) -> Result<Attribute, CaptureError> {
    use super::unix;
    use std::os::unix::fs::MetadataExt;

    Ok(match kind {
        AttributeKind::FileType => Attribute::FileType(unix::file_type(meta)),
        AttributeKind::Permissions => Attribute::Permissions(Permissions::from_mode(meta.mode())),
        AttributeKind::Identity(ident) => {
            let id = unix::owner_id(meta, ident);
            let name = unix::resolve_name(ident, id)
                .map_err(|source| CaptureError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
                .ok_or_else(|| CaptureError::IdentityResolution {
                    path: path.to_path_buf(),
                    kind: ident,
                    id,
                })?;
            Attribute::Identity(Identity {
                kind: ident,
                id,
                name,
            })
        }
        AttributeKind::Timestamp(ts) => Attribute::Timestamp(Timestamp {
            kind: ts,
            millis: unix::timestamp_millis(meta, ts),
        }),
        AttributeKind::Acl => Attribute::Acl(read_acl(path, meta.mode())?),
    })
}

#[cfg(not(unix))]
fn decode(path: &Path, meta: &Metadata, kind: AttributeKind) -> Result<Attribute, CaptureError> {
    use super::FileType;

    match kind {
        AttributeKind::FileType => {
            let ft = meta.file_type();
            Ok(Attribute::FileType(if ft.is_symlink() {
                FileType::Symlink
            } else if ft.is_dir() {
                FileType::Directory
            } else if ft.is_file() {
                FileType::Regular
            } else {
                FileType::Unknown
            }))
        }
        AttributeKind::Acl => Ok(Attribute::Acl(read_acl(path, 0)?)),
        other => Err(CaptureError::Unsupported { kind: other }),
    }
}

fn read_acl(path: &Path, mode: u32) -> Result<Vec<super::AclEntry>, CaptureError> {
    acl::read(path, mode).map_err(|source| {
        if let Some(unresolved) = source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<acl::Unresolved>())
        {
            return CaptureError::IdentityResolution {
                path: path.to_path_buf(),
                kind: unresolved.kind,
                id: unresolved.id,
            };
        }
        match source.kind() {
            // removed between the stat and the xattr read
            io::ErrorKind::NotFound => CaptureError::NotFound(path.to_path_buf()),
            _ => CaptureError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    })
}
