// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Reference file monitor plugin.
//!
//! Paths arrive through the `file-monitor` capability. A background thread
//! polls them and emits one `file-state` parcel per changed path. Parcels
//! emitted in the same pass share a group whose final parcel is `Last`.

use std::collections::BTreeSet;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use plugin_harness::attr::{capture, AttributeKind};
use plugin_harness::bridge::abi::{
    descriptor_json, parse_config, PluginHost, RawDescriptor, RawHostApi, RawStart,
};
use plugin_harness::bridge::{Descriptor, HandlerRef};
use plugin_harness::parcel::{Compression, Disposition, Parcel, Sequence};

pub const NAME: &str = "file-watch";
pub const MONITOR: HandlerRef = HandlerRef(1);
/// Host setting naming the default poll interval.
pub const INTERVAL_SETTING: &str = "file_watch.interval_ms";
const DEFAULT_INTERVAL_MS: u64 = 100;

const OK: i32 = 0;
const UNKNOWN_HANDLER: i32 = 1;
const BAD_REQUEST: i32 = 2;

pub fn descriptor() -> Descriptor {
    Descriptor::new(NAME, env!("CARGO_PKG_VERSION"))
        .with_inbound("file-monitor", 1, &["interval_ms"], MONITOR)
        .with_outbound("file-state", 1)
}

struct Watch {
    path: PathBuf,
    kinds: BTreeSet<AttributeKind>,
    last: Option<Vec<u8>>,
}

/// Polling core. Knows nothing about the ABI.
#[derive(Default)]
pub struct Poller {
    watches: Vec<Watch>,
    round: u64,
    minor: u64,
}

impl Poller {
    pub fn watch(&mut self, path: PathBuf, kinds: BTreeSet<AttributeKind>) {
        debug!("watching {}", path.display());
        self.watches.push(Watch {
            path,
            kinds,
            last: None,
        });
    }

    /// One pass over every watch; returns parcels for paths whose state
    /// changed since the previous pass.
    pub fn poll(&mut self) -> Vec<Parcel> {
        let changed: Vec<Vec<u8>> = self
            .watches
            .iter_mut()
            .filter_map(|w| {
                let payload = state_payload(w);
                if w.last.as_ref() == Some(&payload) {
                    return None;
                }
                w.last = Some(payload.clone());
                Some(payload)
            })
            .collect();
        if changed.is_empty() {
            return Vec::new();
        }
        self.round += 1;
        let count = changed.len();
        changed
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                self.minor += 1;
                let disposition = if i + 1 == count {
                    Disposition::Last
                } else {
                    Disposition::Part
                };
                Parcel::new(NAME, "host", "file-state", Sequence::new(1, self.minor))
                    .with_group(self.round, disposition)
                    .with_payload(Compression::None, payload)
            })
            .collect()
    }
}

fn state_payload(watch: &Watch) -> Vec<u8> {
    let path = watch.path.display().to_string();
    let value = match capture(&watch.path, &watch.kinds) {
        Ok(snapshot) => serde_json::json!({ "path": path, "exists": true, "snapshot": snapshot }),
        Err(e) if e.is_not_found() => serde_json::json!({ "path": path, "exists": false }),
        Err(e) => serde_json::json!({ "path": path, "error": e.to_string() }),
    };
    serde_json::to_vec(&value).unwrap_or_default()
}

struct Shared {
    poller: Mutex<Poller>,
    running: AtomicBool,
    interval_ms: AtomicU64,
}

impl Shared {
    fn poller(&self) -> MutexGuard<'_, Poller> {
        self.poller.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct State {
    descriptor: CString,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl State {
    fn raw_descriptor(&self) -> RawDescriptor {
        RawDescriptor {
            json: self.descriptor.as_ptr(),
            deliver: Some(plugin_deliver),
        }
    }
}

fn run_worker(host: PluginHost, shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let parcels = shared.poller().poll();
        for parcel in &parcels {
            if let Err(e) = host.emit(parcel) {
                warn!("cannot emit {parcel}: {e}");
            }
        }
        thread::sleep(Duration::from_millis(shared.interval_ms.load(Ordering::SeqCst)));
    }
}

/// # Safety
/// Called by the host with a valid API table and a NUL terminated config.
#[no_mangle]
pub unsafe extern "C-unwind" fn plugin_start(api: *const RawHostApi, config: *const c_char) -> RawStart {
    let settings = parse_config(config);
    let interval_ms = settings
        .get(INTERVAL_SETTING)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_MS);
    let shared = Arc::new(Shared {
        poller: Mutex::new(Poller::default()),
        running: AtomicBool::new(true),
        interval_ms: AtomicU64::new(interval_ms.max(1)),
    });
    let worker = PluginHost::from_raw(api).map(|host| {
        let shared = shared.clone();
        thread::spawn(move || run_worker(host, shared))
    });
    let state = Box::new(State {
        descriptor: descriptor_json(&descriptor()),
        shared,
        worker,
    });
    let descriptor = state.raw_descriptor();
    RawStart {
        state: Box::into_raw(state) as *mut c_void,
        descriptor,
    }
}

/// # Safety
/// `state` must come from `plugin_start` and not yet be stopped.
#[no_mangle]
pub unsafe extern "C-unwind" fn plugin_status(state: *mut c_void) -> RawDescriptor {
    match (state as *const State).as_ref() {
        Some(state) => state.raw_descriptor(),
        None => RawDescriptor {
            json: std::ptr::null(),
            deliver: None,
        },
    }
}

unsafe extern "C-unwind" fn plugin_deliver(state: *mut c_void, handler: u64, request: *const c_char) -> i32 {
    let Some(state) = (state as *const State).as_ref() else {
        return BAD_REQUEST;
    };
    if HandlerRef(handler) != MONITOR {
        return UNKNOWN_HANDLER;
    }
    if request.is_null() {
        return BAD_REQUEST;
    }
    let Some(request) = CStr::from_ptr(request)
        .to_str()
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
    else {
        return BAD_REQUEST;
    };
    let Some(path) = request["path"].as_str() else {
        return BAD_REQUEST;
    };
    let kinds = request["attributes"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|k| k.as_str()?.parse().ok())
        .collect();
    if let Some(ms) = request["config"]["interval_ms"].as_u64() {
        state.shared.interval_ms.fetch_min(ms.max(1), Ordering::SeqCst);
    }
    state.shared.poller().watch(PathBuf::from(path), kinds);
    OK
}

/// # Safety
/// `state` must come from `plugin_start`; it is freed here.
#[no_mangle]
pub unsafe extern "C-unwind" fn plugin_stop(state: *mut c_void) {
    if state.is_null() {
        return;
    }
    let mut state = Box::from_raw(state as *mut State);
    state.shared.running.store(false, Ordering::SeqCst);
    if let Some(worker) = state.worker.take() {
        let _ = worker.join();
    }
    debug!("{NAME} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn kinds() -> BTreeSet<AttributeKind> {
        [AttributeKind::FileType, AttributeKind::Permissions].into()
    }

    #[test]
    fn emits_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let mut poller = Poller::default();
        poller.watch(a.clone(), kinds());

        let first = poller.poll();
        assert_eq!(first.len(), 1);
        assert!(first[0].payload_text().unwrap().contains("\"exists\":false"));
        assert!(poller.poll().is_empty());

        fs::write(&a, b"x").unwrap();
        let second = poller.poll();
        assert_eq!(second.len(), 1);
        assert!(second[0].payload_text().unwrap().contains("\"exists\":true"));
        assert!(second[0].sequence() > first[0].sequence());
    }

    #[test]
    fn one_pass_is_one_group() {
        let dir = tempfile::tempdir().unwrap();
        let mut poller = Poller::default();
        for name in ["a", "b", "c"] {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            poller.watch(path, kinds());
        }
        let parcels = poller.poll();
        let groups: Vec<_> = parcels.iter().filter_map(|p| p.group()).collect();
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.id == 1));
        assert_eq!(groups[0].disposition, Disposition::Part);
        assert_eq!(groups[2].disposition, Disposition::Last);
        assert!(plugin_harness::parcel::StreamValidator::validate(&parcels).is_empty());
    }

    static SEEN: Mutex<Vec<Parcel>> = Mutex::new(Vec::new());

    unsafe extern "C-unwind" fn collect(_: *const c_void, raw: *const plugin_harness::bridge::abi::RawParcel) {
        if let Ok(parcel) = (*raw).to_parcel() {
            SEEN.lock().unwrap().push(parcel);
        }
    }

    #[test]
    fn entry_points_drive_the_poller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        fs::write(&path, b"x").unwrap();
        let api = RawHostApi {
            context: std::ptr::null(),
            emit: collect,
        };
        let config = CString::new(format!("{{\"{INTERVAL_SETTING}\":\"5\"}}")).unwrap();
        let request = CString::new(
            serde_json::json!({ "path": path, "attributes": ["file-type"] }).to_string(),
        )
        .unwrap();
        unsafe {
            let start = plugin_start(&api, config.as_ptr());
            let deliver = start.descriptor.deliver.unwrap();
            assert_eq!(deliver(start.state, 9, request.as_ptr()), UNKNOWN_HANDLER);
            assert_eq!(deliver(start.state, MONITOR.0, request.as_ptr()), OK);
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while SEEN.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            plugin_stop(start.state);
        }
        let seen = SEEN.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sender(), NAME);
        assert!(seen[0].payload_text().unwrap().contains("regular"));
    }

    #[test]
    fn descriptor_advertises_monitor() {
        let d = descriptor();
        assert_eq!(d.inbound("file-monitor").map(|c| c.handler), Some(MONITOR));
        assert!(d.outbound("file-state").is_some());
    }
}
