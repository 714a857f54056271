// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Module bridge: owns one loaded plugin for the length of a scenario.
//!
//! Every call into the plugin runs behind a fault boundary. A panic that
//! unwinds out of an entry point becomes [`BridgeError::PluginFault`]; the
//! driver treats it as fatal. Faults that do not unwind (a segfault in native
//! code) still take the whole process down.

pub mod abi;
pub mod channel;
pub mod descriptor;
pub mod dynamic;
pub mod plugin;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;

pub use channel::{ChannelStats, HostApi};
pub use descriptor::{Descriptor, HandlerRef, InboundCapability, OutboundCapability};
pub use dynamic::DynamicPlugin;
pub use plugin::{Plugin, PluginError};

use crate::config::Settings;
use crate::parcel::Parcel;
use channel::CaptureReceiver;

/// Errors raised at the plugin boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot load plugin module {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
    #[error("plugin used after unload")]
    UseAfterUnload,
    #[error("plugin faulted in `{entry}`: {message}")]
    PluginFault { entry: &'static str, message: String },
    #[error("plugin `{entry}` failed: {source}")]
    Plugin {
        entry: &'static str,
        #[source]
        source: PluginError,
    },
    #[error("capability `{0}` is not advertised by the plugin")]
    CapabilityNotAdvertised(String),
    #[error("capability `{capability}` does not accept config key `{key}`")]
    UnsupportedConfigKey { capability: String, key: String },
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

/// Run one plugin entry point behind the fault boundary.
fn checked<T>(
    entry: &'static str,
    call: impl FnOnce() -> Result<T, PluginError>,
) -> Result<T, BridgeError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(BridgeError::Plugin { entry, source }),
        Err(payload) => {
            let message = panic_message(payload);
            error!("plugin fault in {entry}: {message}");
            Err(BridgeError::PluginFault { entry, message })
        }
    }
}

/// One loaded plugin plus the channel capturing what it emits.
pub struct ModuleBridge {
    plugin: Option<Box<dyn Plugin>>,
    descriptor: Descriptor,
    capture: CaptureReceiver,
}

impl ModuleBridge {
    /// Load a plugin shared library and start it.
    pub fn load(path: &Path, settings: &Settings, capacity: usize) -> Result<Self, BridgeError> {
        let plugin = DynamicPlugin::open(path)?;
        Self::attach(Box::new(plugin), settings, capacity)
    }

    /// Start an already constructed plugin.
    ///
    /// When `start` fails the plugin never counts as loaded and `stop` is not
    /// called on it.
    pub fn attach(
        mut plugin: Box<dyn Plugin>,
        settings: &Settings,
        capacity: usize,
    ) -> Result<Self, BridgeError> {
        let (host, capture) = channel::bounded(capacity);
        let descriptor = checked("start", || plugin.start(host, settings))?;
        info!(
            "plugin {} {} started: {} inbound, {} outbound capabilities",
            descriptor.name,
            descriptor.version,
            descriptor.inbound.len(),
            descriptor.outbound.len()
        );
        Ok(Self {
            plugin: Some(plugin),
            descriptor,
            capture,
        })
    }

    fn plugin_mut(&mut self) -> Result<&mut Box<dyn Plugin>, BridgeError> {
        self.plugin.as_mut().ok_or(BridgeError::UseAfterUnload)
    }

    pub fn is_loaded(&self) -> bool {
        self.plugin.is_some()
    }

    /// Descriptor from the most recent `start` or `status` call.
    pub fn descriptor(&self) -> Result<&Descriptor, BridgeError> {
        if self.plugin.is_none() {
            return Err(BridgeError::UseAfterUnload);
        }
        Ok(&self.descriptor)
    }

    /// Ask the plugin for its current self-description.
    pub fn poll_status(&mut self) -> Result<Descriptor, BridgeError> {
        let plugin = self.plugin_mut()?;
        let descriptor = checked("status", || plugin.status())?;
        if descriptor != self.descriptor {
            debug!("plugin {} changed its descriptor", descriptor.name);
        }
        self.descriptor = descriptor.clone();
        Ok(descriptor)
    }

    /// Route `request` to the handler of inbound capability `capability`.
    ///
    /// Keys of the request's `config` object must be among the keys the
    /// capability declares.
    pub fn deliver(
        &mut self,
        capability: &str,
        request: &serde_json::Value,
    ) -> Result<(), BridgeError> {
        let descriptor = self.poll_status()?;
        let cap = descriptor
            .inbound(capability)
            .ok_or_else(|| BridgeError::CapabilityNotAdvertised(capability.into()))?;
        if let Some(config) = request.get("config").and_then(|c| c.as_object()) {
            if let Some(key) = config.keys().find(|k| !cap.accepts_key(k)) {
                return Err(BridgeError::UnsupportedConfigKey {
                    capability: capability.into(),
                    key: key.clone(),
                });
            }
        }
        let handler = cap.handler;
        debug!("delivering to {capability} ({handler})");
        let plugin = self.plugin_mut()?;
        checked("deliver", || plugin.deliver(handler, request))
    }

    /// Everything captured since the last drain, in arrival order.
    pub fn drain(&mut self) -> Result<Vec<Parcel>, BridgeError> {
        self.plugin_mut()?;
        Ok(self.capture.drain())
    }

    /// Wait up to `timeout` for the next captured parcel.
    pub fn wait_next(&mut self, timeout: Duration) -> Result<Option<Parcel>, BridgeError> {
        self.plugin_mut()?;
        Ok(self.capture.wait_next(timeout))
    }

    pub fn stats(&self) -> ChannelStats {
        self.capture.stats()
    }

    /// Stop the plugin and release the module.
    ///
    /// `stop` runs at most once; calling `unload` again is a no-op.
    pub fn unload(&mut self) -> Result<(), BridgeError> {
        let Some(mut plugin) = self.plugin.take() else {
            return Ok(());
        };
        let result = checked("stop", || plugin.stop());
        drop(plugin);
        info!("plugin {} unloaded", self.descriptor.name);
        result
    }
}

impl Drop for ModuleBridge {
    fn drop(&mut self) {
        if let Err(e) = self.unload() {
            error!("unload on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parcel::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Echo {
        host: Option<HostApi>,
        stops: Arc<AtomicUsize>,
        panic_in_status: bool,
    }

    impl Plugin for Echo {
        fn start(&mut self, host: HostApi, _: &Settings) -> Result<Descriptor, PluginError> {
            host.emit(Parcel::new("echo", "host", "hello", Sequence::new(1, 0)));
            self.host = Some(host);
            self.status()
        }

        fn status(&mut self) -> Result<Descriptor, PluginError> {
            if self.panic_in_status {
                panic!("status exploded");
            }
            Ok(Descriptor::new("echo", "0.1.0").with_inbound(
                "echo",
                1,
                &["depth"],
                HandlerRef(3),
            ))
        }

        fn deliver(&mut self, handler: HandlerRef, _: &serde_json::Value) -> Result<(), PluginError> {
            assert_eq!(handler, HandlerRef(3));
            if let Some(host) = &self.host {
                host.emit(Parcel::new("echo", "host", "echo", Sequence::new(1, 1)));
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), PluginError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings::new()
    }

    #[test]
    fn lifecycle_and_capture() {
        let stops = Arc::new(AtomicUsize::new(0));
        let echo = Echo {
            stops: stops.clone(),
            ..Default::default()
        };
        let mut bridge = ModuleBridge::attach(Box::new(echo), &settings(), 16).unwrap();
        assert_eq!(bridge.descriptor().unwrap().name, "echo");
        bridge
            .deliver("echo", &serde_json::json!({"config": {"depth": 2}}))
            .unwrap();
        let kinds: Vec<String> = bridge.drain().unwrap().iter().map(|p| p.kind().to_string()).collect();
        assert_eq!(kinds, vec!["hello", "echo"]);

        bridge.unload().unwrap();
        bridge.unload().unwrap();
        drop(bridge);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn calls_after_unload_fail() {
        let mut bridge = ModuleBridge::attach(Box::new(Echo::default()), &settings(), 4).unwrap();
        bridge.unload().unwrap();
        assert!(matches!(bridge.poll_status(), Err(BridgeError::UseAfterUnload)));
        assert!(matches!(bridge.drain(), Err(BridgeError::UseAfterUnload)));
        assert!(matches!(bridge.descriptor(), Err(BridgeError::UseAfterUnload)));
        assert!(matches!(
            bridge.deliver("echo", &serde_json::json!({})),
            Err(BridgeError::UseAfterUnload)
        ));
    }

    #[test]
    fn unknown_capability_and_key_are_rejected() {
        let mut bridge = ModuleBridge::attach(Box::new(Echo::default()), &settings(), 4).unwrap();
        assert!(matches!(
            bridge.deliver("registry", &serde_json::json!({})),
            Err(BridgeError::CapabilityNotAdvertised(name)) if name == "registry"
        ));
        assert!(matches!(
            bridge.deliver("echo", &serde_json::json!({"config": {"width": 1}})),
            Err(BridgeError::UnsupportedConfigKey { key, .. }) if key == "width"
        ));
    }

    #[test]
    fn panic_becomes_fault() {
        let mut bridge = ModuleBridge::attach(Box::new(Echo::default()), &settings(), 4).unwrap();
        if let Some(plugin) = bridge.plugin.as_mut() {
            // swap in a plugin that panics on status
            *plugin = Box::new(Echo {
                panic_in_status: true,
                ..Default::default()
            });
        }
        match bridge.poll_status() {
            Err(BridgeError::PluginFault { entry, message }) => {
                assert_eq!(entry, "status");
                assert!(message.contains("status exploded"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
