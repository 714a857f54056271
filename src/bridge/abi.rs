// CLASSIFICATION: COMMUNITY
// Filename: abi.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Binary interface between the host and a plugin shared library.
//!
//! A plugin exports three symbols:
//!
//! ```text
//! plugin_start(api: *const RawHostApi, config: *const c_char) -> RawStart
//! plugin_status(state: *mut c_void) -> RawDescriptor
//! plugin_stop(state: *mut c_void)
//! ```
//!
//! `config` is the host settings map as a JSON object. Descriptors travel as
//! JSON text owned by the plugin and valid until its next entry point call.
//! All entry points use the `C-unwind` ABI so a plugin panic reaches the
//! host's fault boundary instead of aborting the process.

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use thiserror::Error;

use super::descriptor::Descriptor;
use crate::parcel::{Compression, Disposition, Parcel, Sequence};

pub const START_SYMBOL: &[u8] = b"plugin_start\0";
pub const STATUS_SYMBOL: &[u8] = b"plugin_status\0";
pub const STOP_SYMBOL: &[u8] = b"plugin_stop\0";

pub const GROUP_NONE: u32 = 0;
pub const GROUP_PART: u32 = 1;
pub const GROUP_LAST: u32 = 2;

pub type EmitFn = unsafe extern "C-unwind" fn(context: *const c_void, parcel: *const RawParcel);
pub type DeliverFn =
    unsafe extern "C-unwind" fn(state: *mut c_void, handler: u64, request: *const c_char) -> i32;
pub type StartFn =
    unsafe extern "C-unwind" fn(api: *const RawHostApi, config: *const c_char) -> RawStart;
pub type StatusFn = unsafe extern "C-unwind" fn(state: *mut c_void) -> RawDescriptor;
pub type StopFn = unsafe extern "C-unwind" fn(state: *mut c_void);

/// Parcel as it crosses the boundary. Every pointer is borrowed for the
/// duration of the emit call only.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawParcel {
    pub time_ms: i64,
    pub sender: *const c_char,
    pub recipient: *const c_char,
    pub kind: *const c_char,
    pub compression: u32,
    pub seq_major: u64,
    pub seq_minor: u64,
    pub group_disposition: u32,
    pub group_id: u64,
    pub payload: *const u8,
    pub payload_len: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawHostApi {
    pub context: *const c_void,
    pub emit: EmitFn,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawDescriptor {
    pub json: *const c_char,
    pub deliver: Option<DeliverFn>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStart {
    pub state: *mut c_void,
    pub descriptor: RawDescriptor,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("null {0} pointer")]
    Null(&'static str),
    #[error("{0} is not valid UTF-8")]
    Utf8(&'static str),
    #[error("{0} contains an interior NUL")]
    InteriorNul(&'static str),
    #[error("unknown compression code {0}")]
    Compression(u32),
    #[error("unknown group disposition {0}")]
    Disposition(u32),
    #[error("timestamp {0}ms out of range")]
    Time(i64),
}

unsafe fn borrowed_str<'a>(ptr: *const c_char, field: &'static str) -> Result<&'a str, AbiError> {
    if ptr.is_null() {
        return Err(AbiError::Null(field));
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| AbiError::Utf8(field))
}

impl RawParcel {
    /// Copy a borrowed raw parcel into an owned [`Parcel`].
    ///
    /// # Safety
    /// String pointers must be NUL terminated and `payload` valid for
    /// `payload_len` bytes, or null when the length is zero.
    pub unsafe fn to_parcel(&self) -> Result<Parcel, AbiError> {
        let sender = borrowed_str(self.sender, "sender")?;
        let recipient = borrowed_str(self.recipient, "recipient")?;
        let kind = borrowed_str(self.kind, "type")?;
        let compression =
            Compression::from_code(self.compression).ok_or(AbiError::Compression(self.compression))?;
        let time = Utc
            .timestamp_millis_opt(self.time_ms)
            .single()
            .ok_or(AbiError::Time(self.time_ms))?;
        let payload = if self.payload_len == 0 {
            Vec::new()
        } else if self.payload.is_null() {
            return Err(AbiError::Null("payload"));
        } else {
            std::slice::from_raw_parts(self.payload, self.payload_len).to_vec()
        };
        let mut parcel = Parcel::new(sender, recipient, kind, Sequence::new(self.seq_major, self.seq_minor))
            .with_time(time)
            .with_payload(compression, payload);
        parcel = match self.group_disposition {
            GROUP_NONE => parcel,
            GROUP_PART => parcel.with_group(self.group_id, Disposition::Part),
            GROUP_LAST => parcel.with_group(self.group_id, Disposition::Last),
            other => return Err(AbiError::Disposition(other)),
        };
        Ok(parcel)
    }
}

/// Owned backing storage for a [`RawParcel`], used by plugins written in Rust.
pub struct RawParcelBuf {
    sender: CString,
    recipient: CString,
    kind: CString,
    parcel: Parcel,
}

impl RawParcelBuf {
    pub fn new(parcel: &Parcel) -> Result<Self, AbiError> {
        let c = |s: &str, field| CString::new(s).map_err(|_| AbiError::InteriorNul(field));
        Ok(Self {
            sender: c(parcel.sender(), "sender")?,
            recipient: c(parcel.recipient(), "recipient")?,
            kind: c(parcel.kind(), "type")?,
            parcel: parcel.clone(),
        })
    }

    /// View valid while `self` is alive.
    pub fn as_raw(&self) -> RawParcel {
        let (group_disposition, group_id) = match self.parcel.group() {
            None => (GROUP_NONE, 0),
            Some(g) => match g.disposition {
                Disposition::Part => (GROUP_PART, g.id),
                Disposition::Last => (GROUP_LAST, g.id),
            },
        };
        let payload = self.parcel.payload();
        RawParcel {
            time_ms: self.parcel.time().timestamp_millis(),
            sender: self.sender.as_ptr(),
            recipient: self.recipient.as_ptr(),
            kind: self.kind.as_ptr(),
            compression: self.parcel.compression().code(),
            seq_major: self.parcel.sequence().major,
            seq_minor: self.parcel.sequence().minor,
            group_disposition,
            group_id,
            payload: if payload.is_empty() {
                std::ptr::null()
            } else {
                payload.as_ptr()
            },
            payload_len: payload.len(),
        }
    }
}

/// Plugin-side wrapper over the host API table received at start.
#[derive(Clone)]
pub struct PluginHost {
    api: Arc<RawHostApi>,
}

// SAFETY: the host guarantees `context` stays valid and `emit` is safe to call
// from any thread until `plugin_stop` returns.
unsafe impl Send for PluginHost {}
unsafe impl Sync for PluginHost {}

impl PluginHost {
    /// # Safety
    /// `api` must be the pointer handed to `plugin_start`.
    pub unsafe fn from_raw(api: *const RawHostApi) -> Option<Self> {
        api.as_ref().map(|api| Self { api: Arc::new(*api) })
    }

    pub fn emit(&self, parcel: &Parcel) -> Result<(), AbiError> {
        let buf = RawParcelBuf::new(parcel)?;
        let raw = buf.as_raw();
        // SAFETY: `raw` borrows from `buf`, which outlives the call.
        unsafe { (self.api.emit)(self.api.context, &raw) };
        Ok(())
    }
}

/// Serialize a descriptor for return across the boundary.
pub fn descriptor_json(descriptor: &Descriptor) -> CString {
    // serde_json escapes control characters, so the text never holds a NUL
    let text = serde_json::to_string(descriptor).unwrap_or_else(|_| "{}".into());
    CString::new(text).unwrap_or_default()
}

/// Parse a descriptor returned by a plugin.
///
/// # Safety
/// `json` must be null or a NUL terminated string.
pub unsafe fn parse_descriptor(json: *const c_char) -> Result<Descriptor, String> {
    let text = borrowed_str(json, "descriptor").map_err(|e| e.to_string())?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// Parse the host settings handed to `plugin_start`.
///
/// # Safety
/// `config` must be null or a NUL terminated string.
pub unsafe fn parse_config(config: *const c_char) -> crate::config::Settings {
    borrowed_str(config, "config")
        .ok()
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::{self, HostApi};
    use crate::bridge::descriptor::HandlerRef;

    unsafe extern "C-unwind" fn forward(context: *const c_void, parcel: *const RawParcel) {
        let host = &*(context as *const HostApi);
        match (*parcel).to_parcel() {
            Ok(p) => host.emit(p),
            Err(e) => host.reject(&e.to_string()),
        }
    }

    #[test]
    fn parcel_crosses_boundary_intact() {
        let (host, rx) = channel::bounded(8);
        let raw_api = RawHostApi {
            context: &host as *const HostApi as *const c_void,
            emit: forward,
        };
        let plugin_host = unsafe { PluginHost::from_raw(&raw_api) }.unwrap();
        let sent = Parcel::new("fim", "host", "file-state", Sequence::new(4, 2))
            .with_time(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap())
            .with_group(11, Disposition::Last)
            .with_payload(Compression::None, b"{}".to_vec());
        plugin_host.emit(&sent).unwrap();
        let got = rx.drain();
        assert_eq!(got, vec![sent]);
    }

    #[test]
    fn null_sender_is_rejected() {
        let raw = RawParcel {
            time_ms: 0,
            sender: std::ptr::null(),
            recipient: std::ptr::null(),
            kind: std::ptr::null(),
            compression: 0,
            seq_major: 0,
            seq_minor: 0,
            group_disposition: GROUP_NONE,
            group_id: 0,
            payload: std::ptr::null(),
            payload_len: 0,
        };
        assert_eq!(unsafe { raw.to_parcel() }.unwrap_err(), AbiError::Null("sender"));
    }

    #[test]
    fn bad_disposition_is_rejected() {
        let parcel = Parcel::new("a", "b", "c", Sequence::default());
        let buf = RawParcelBuf::new(&parcel).unwrap();
        let mut raw = buf.as_raw();
        raw.group_disposition = 9;
        assert_eq!(unsafe { raw.to_parcel() }.unwrap_err(), AbiError::Disposition(9));
    }

    #[test]
    fn descriptor_text_round_trips() {
        let desc = Descriptor::new("fim", "1.0.0")
            .with_inbound("file-monitor", 1, &["interval_ms"], HandlerRef(1));
        let text = descriptor_json(&desc);
        assert_eq!(unsafe { parse_descriptor(text.as_ptr()) }.unwrap(), desc);
        assert!(unsafe { parse_descriptor(std::ptr::null()) }.is_err());
    }
}
