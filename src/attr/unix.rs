// CLASSIFICATION: COMMUNITY
// Filename: unix.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

use std::ffi::CStr;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use super::{FileType, IdentityKind, TimestampKind};

const S_IFMT: u32 = 0o170000;
const S_IFWHT: u32 = 0o160000;
const MAX_NSS_BUF: usize = 1 << 20;

pub(crate) fn file_type(meta: &Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::Regular
    } else if ft.is_socket() {
        FileType::Socket
    } else if ft.is_fifo() {
        FileType::Fifo
    } else if ft.is_char_device() {
        FileType::CharSpecial
    } else if ft.is_block_device() {
        FileType::BlockSpecial
    } else if meta.mode() & S_IFMT == S_IFWHT {
        FileType::Whiteout
    } else {
        FileType::Unknown
    }
}

pub(crate) fn owner_id(meta: &Metadata, kind: IdentityKind) -> u32 {
    match kind {
        IdentityKind::User => meta.uid(),
        IdentityKind::Group => meta.gid(),
    }
}

pub(crate) fn timestamp_millis(meta: &Metadata, kind: TimestampKind) -> i64 {
    let (secs, nsec) = match kind {
        TimestampKind::Access => (meta.atime(), meta.atime_nsec()),
        TimestampKind::Modify => (meta.mtime(), meta.mtime_nsec()),
        TimestampKind::MetadataChange => (meta.ctime(), meta.ctime_nsec()),
    };
    secs * 1000 + nsec / 1_000_000
}

/// Look up the name for a uid or gid. `Ok(None)` means the id is unknown to
/// the name service.
pub(crate) fn resolve_name(kind: IdentityKind, id: u32) -> io::Result<Option<String>> {
    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        let mut result_null = true;
        let mut name = None;
        // SAFETY: the out structs are zero-initialised plain C structs, and
        // `buf` outlives every pointer the lookup stores into them.
        let rc = unsafe {
            match kind {
                IdentityKind::User => {
                    let mut pwd: libc::passwd = std::mem::zeroed();
                    let mut result: *mut libc::passwd = std::ptr::null_mut();
                    let rc = libc::getpwuid_r(id, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result);
                    if rc == 0 && !result.is_null() {
                        result_null = false;
                        name = Some(CStr::from_ptr(pwd.pw_name).to_string_lossy().into_owned());
                    }
                    rc
                }
                IdentityKind::Group => {
                    let mut grp: libc::group = std::mem::zeroed();
                    let mut result: *mut libc::group = std::ptr::null_mut();
                    let rc = libc::getgrgid_r(id, &mut grp, buf.as_mut_ptr(), buf.len(), &mut result);
                    if rc == 0 && !result.is_null() {
                        result_null = false;
                        name = Some(CStr::from_ptr(grp.gr_name).to_string_lossy().into_owned());
                    }
                    rc
                }
            }
        };
        match rc {
            0 if result_null => return Ok(None),
            0 => return Ok(name),
            libc::ERANGE if buf.len() < MAX_NSS_BUF => {
                let len = buf.len() * 2;
                buf.resize(len, 0);
            }
            // Some libcs report "not found" through these instead of a null result.
            libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => return Ok(None),
            err => return Err(io::Error::from_raw_os_error(err)),
        }
    }
}
