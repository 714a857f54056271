// CLASSIFICATION: COMMUNITY
// Filename: fixture.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Per-run working directory and the filesystem fixtures applied inside it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use log::debug;
use tempfile::TempDir;
use thiserror::Error;

use crate::attr::Permissions;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("cannot create scenario workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} resolves outside the scenario workspace", path.display())]
    Escapes { path: PathBuf },
    #[error("refusing to {action} through symlink {}", path.display())]
    ThroughSymlink {
        action: &'static str,
        path: PathBuf,
    },
    #[error("symlinks are not supported on this platform")]
    Unsupported,
}

/// One setup mutation of the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureAction {
    Create {
        content: String,
        mode: Option<Permissions>,
    },
    Mkdir {
        mode: Option<Permissions>,
    },
    Symlink {
        target: PathBuf,
    },
    Chmod {
        mode: Permissions,
    },
    Write {
        content: String,
    },
    Append {
        content: String,
    },
    Remove,
}

impl FixtureAction {
    pub fn name(&self) -> &'static str {
        match self {
            FixtureAction::Create { .. } => "create",
            FixtureAction::Mkdir { .. } => "mkdir",
            FixtureAction::Symlink { .. } => "symlink",
            FixtureAction::Chmod { .. } => "chmod",
            FixtureAction::Write { .. } => "write",
            FixtureAction::Append { .. } => "append",
            FixtureAction::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    /// Relative to the workspace root.
    pub path: PathBuf,
    pub action: FixtureAction,
}

/// Whether `path` stays inside the workspace: relative, no `..`.
pub fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Temporary root every script path is resolved against. Removed on drop.
pub struct Workspace {
    dir: TempDir,
    /// `dir` with every symlink resolved; containment is checked against it.
    real: PathBuf,
}

impl Workspace {
    pub fn create() -> Result<Self, FixtureError> {
        let dir = tempfile::Builder::new()
            .prefix("plugin-harness-")
            .tempdir()
            .map_err(FixtureError::Workspace)?;
        let real = fs::canonicalize(dir.path()).map_err(FixtureError::Workspace)?;
        debug!("scenario workspace {}", dir.path().display());
        Ok(Self { dir, real })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn resolve(&self, rel: &Path) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn apply(&self, fixture: &Fixture) -> Result<(), FixtureError> {
        let path = self.resolve(&fixture.path);
        let action = fixture.action.name();
        debug!("fixture {action} {}", path.display());
        if !is_contained(&fixture.path) {
            return Err(FixtureError::Escapes { path });
        }
        self.confine(action, &path, &fixture.action)?;
        let io_err = |source| FixtureError::Io {
            action,
            path: path.clone(),
            source,
        };
        match &fixture.action {
            FixtureAction::Create { content, mode } => {
                ensure_parent(&path).map_err(io_err)?;
                let mut f = open_nofollow(&path, false).map_err(io_err)?;
                f.write_all(content.as_bytes()).map_err(io_err)?;
                if let Some(mode) = mode {
                    set_mode(&path, *mode).map_err(io_err)?;
                }
            }
            FixtureAction::Mkdir { mode } => {
                fs::create_dir_all(&path).map_err(io_err)?;
                if let Some(mode) = mode {
                    set_mode(&path, *mode).map_err(io_err)?;
                }
            }
            FixtureAction::Symlink { target } => {
                if !is_contained(target) {
                    return Err(FixtureError::Escapes {
                        path: target.clone(),
                    });
                }
                ensure_parent(&path).map_err(io_err)?;
                #[cfg(unix)]
                std::os::unix::fs::symlink(target, &path).map_err(io_err)?;
                #[cfg(not(unix))]
                return Err(FixtureError::Unsupported);
            }
            FixtureAction::Chmod { mode } => set_mode(&path, *mode).map_err(io_err)?,
            FixtureAction::Write { content } => {
                let mut f = open_nofollow(&path, false).map_err(io_err)?;
                f.write_all(content.as_bytes()).map_err(io_err)?;
            }
            FixtureAction::Append { content } => {
                let mut f = open_nofollow(&path, true).map_err(io_err)?;
                f.write_all(content.as_bytes()).map_err(io_err)?;
            }
            FixtureAction::Remove => {
                let meta = fs::symlink_metadata(&path).map_err(io_err)?;
                if meta.is_dir() {
                    fs::remove_dir_all(&path).map_err(io_err)?;
                } else {
                    fs::remove_file(&path).map_err(io_err)?;
                }
            }
        }
        Ok(())
    }

    /// Refuse fixtures whose parent directory resolves outside the workspace,
    /// and any action other than `remove` on an existing symlink.
    fn confine(
        &self,
        action: &'static str,
        path: &Path,
        fixture: &FixtureAction,
    ) -> Result<(), FixtureError> {
        let io_err = |source| FixtureError::Io {
            action,
            path: path.to_path_buf(),
            source,
        };
        // nearest existing ancestor; missing components are created below it
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            match fs::canonicalize(dir) {
                Ok(real) if real.starts_with(&self.real) => break,
                Ok(_) => {
                    return Err(FixtureError::Escapes {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => ancestor = dir.parent(),
                Err(e) => return Err(io_err(e)),
            }
        }
        if matches!(fixture, FixtureAction::Remove | FixtureAction::Symlink { .. }) {
            return Ok(());
        }
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => Err(FixtureError::ThroughSymlink {
                action,
                path: path.to_path_buf(),
            }),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}

/// Open for writing without following a symlink at the last component.
/// `append` leaves existing content and never creates.
fn open_nofollow(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    if append {
        options.append(true);
    } else {
        options.write(true).create(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW);
    }
    options.open(path)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Permissions) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode.mode()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: Permissions) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(!mode.contains(Permissions::OWNER_WRITE));
    fs::set_permissions(path, perms)
}
