// CLASSIFICATION: COMMUNITY
// Filename: dynamic.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! [`Plugin`] adapter over a shared library exporting the plugin ABI.

use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};

use libloading::Library;
use log::{debug, info, warn};

use super::abi::{
    self, DeliverFn, RawDescriptor, RawHostApi, RawParcel, StartFn, StatusFn, StopFn,
    START_SYMBOL, STATUS_SYMBOL, STOP_SYMBOL,
};
use super::channel::HostApi;
use super::descriptor::{Descriptor, HandlerRef};
use super::plugin::{Plugin, PluginError};
use super::BridgeError;
use crate::config::Settings;

/// Trampoline installed as `RawHostApi::emit`.
unsafe extern "C-unwind" fn emit_trampoline(context: *const c_void, parcel: *const RawParcel) {
    if context.is_null() {
        return;
    }
    // SAFETY: `context` is the boxed HostApi owned by the DynamicPlugin that
    // handed this table to the plugin; it outlives `plugin_stop`.
    let host = &*(context as *const HostApi);
    if parcel.is_null() {
        host.reject("null parcel");
        return;
    }
    match (*parcel).to_parcel() {
        Ok(parcel) => host.emit(parcel),
        Err(e) => host.reject(&e.to_string()),
    }
}

/// A plugin loaded from disk.
///
/// Field order matters: the library is dropped last so no function pointer
/// outlives the code it points into.
pub struct DynamicPlugin {
    path: PathBuf,
    start_fn: StartFn,
    status_fn: StatusFn,
    stop_fn: StopFn,
    deliver_fn: Option<DeliverFn>,
    state: *mut c_void,
    running: bool,
    raw_api: Option<Box<RawHostApi>>,
    host: Option<Box<HostApi>>,
    library: Library,
}

// SAFETY: the raw state pointer is only touched through the plugin's entry
// points, which the ABI requires to be callable from any single thread.
unsafe impl Send for DynamicPlugin {}

impl DynamicPlugin {
    /// Load the module and resolve all three entry points.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        info!("loading plugin module {}", path.display());
        let load_err = |reason: String| BridgeError::Load {
            path: path.to_path_buf(),
            reason,
        };
        // SAFETY: loading runs the module's initialisers; plugins are trusted
        // code under test.
        let library = unsafe { Library::new(path) }.map_err(|e| load_err(e.to_string()))?;
        // SAFETY: symbol types follow the ABI in `abi`. Copying the function
        // pointers out is sound because `library` is stored alongside them.
        let (start_fn, status_fn, stop_fn) = unsafe {
            let start = *library
                .get::<StartFn>(START_SYMBOL)
                .map_err(|e| load_err(format!("missing entry point plugin_start: {e}")))?;
            let status = *library
                .get::<StatusFn>(STATUS_SYMBOL)
                .map_err(|e| load_err(format!("missing entry point plugin_status: {e}")))?;
            let stop = *library
                .get::<StopFn>(STOP_SYMBOL)
                .map_err(|e| load_err(format!("missing entry point plugin_stop: {e}")))?;
            (start, status, stop)
        };
        Ok(Self {
            path: path.to_path_buf(),
            start_fn,
            status_fn,
            stop_fn,
            deliver_fn: None,
            state: std::ptr::null_mut(),
            running: false,
            raw_api: None,
            host: None,
            library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn accept_descriptor(&mut self, raw: RawDescriptor) -> Result<Descriptor, PluginError> {
        // SAFETY: the ABI requires `json` to be null or NUL terminated.
        let descriptor =
            unsafe { abi::parse_descriptor(raw.json) }.map_err(PluginError::InvalidDescriptor)?;
        self.deliver_fn = raw.deliver;
        Ok(descriptor)
    }
}

impl Plugin for DynamicPlugin {
    fn start(&mut self, host: HostApi, settings: &Settings) -> Result<Descriptor, PluginError> {
        let config = serde_json::to_string(settings)
            .ok()
            .and_then(|text| CString::new(text).ok())
            .ok_or_else(|| PluginError::Other("settings are not representable".into()))?;
        let host = Box::new(host);
        let raw_api = Box::new(RawHostApi {
            context: &*host as *const HostApi as *const c_void,
            emit: emit_trampoline,
        });
        // SAFETY: both pointers stay valid until stop; they are stored below.
        let raw = unsafe { (self.start_fn)(&*raw_api, config.as_ptr()) };
        self.host = Some(host);
        self.raw_api = Some(raw_api);
        self.state = raw.state;
        self.running = true;
        debug!("{} started, state {:p}", self.path.display(), self.state);
        self.accept_descriptor(raw.descriptor)
    }

    fn status(&mut self) -> Result<Descriptor, PluginError> {
        // SAFETY: `state` came from plugin_start and stop has not run.
        let raw = unsafe { (self.status_fn)(self.state) };
        self.accept_descriptor(raw)
    }

    fn deliver(
        &mut self,
        handler: HandlerRef,
        request: &serde_json::Value,
    ) -> Result<(), PluginError> {
        let deliver = self.deliver_fn.ok_or(PluginError::NotProvided("deliver"))?;
        let text = CString::new(request.to_string())
            .map_err(|_| PluginError::Other("request contains NUL".into()))?;
        // SAFETY: `text` outlives the call; `state` is live.
        let code = unsafe { deliver(self.state, handler.0, text.as_ptr()) };
        if code == 0 {
            Ok(())
        } else {
            Err(PluginError::Rejected { handler, code })
        }
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        // SAFETY: called once, after a successful start.
        unsafe { (self.stop_fn)(self.state) };
        self.state = std::ptr::null_mut();
        Ok(())
    }
}

impl Drop for DynamicPlugin {
    fn drop(&mut self) {
        if self.running {
            // start succeeded natively but the bridge never took ownership
            warn!("{} dropped while running; stopping", self.path.display());
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.stop()));
        }
        debug!("releasing {} ({:?})", self.path.display(), self.library);
    }
}
