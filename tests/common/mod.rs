// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! In-process file plugin shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use plugin_harness::attr::{capture, AttributeKind};
use plugin_harness::bridge::{Descriptor, HandlerRef, HostApi, Plugin, PluginError};
use plugin_harness::config::Settings;
use plugin_harness::parcel::{Compression, Disposition, Parcel, Sequence};

pub const NAME: &str = "file-agent";
pub const MONITOR: HandlerRef = HandlerRef(1);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Ways the test plugin can break the parcel contract on purpose.
#[derive(Debug, Clone, Copy, Default)]
pub struct Misbehave {
    pub regress_sequence: bool,
    pub reuse_closed_group: bool,
    pub silent: bool,
    /// Extra parcels emitted synchronously from inside `deliver`.
    pub burst: u64,
    pub fail_stop: bool,
}

#[derive(Default)]
pub struct FileAgent {
    pub stops: Arc<AtomicUsize>,
    pub misbehave: Misbehave,
    /// Watched paths that still existed when `stop` ran.
    pub present_at_stop: Arc<AtomicUsize>,
    watched: Vec<PathBuf>,
    host: Option<HostApi>,
    next_seq: u64,
    workers: Vec<JoinHandle<()>>,
}

impl FileAgent {
    pub fn new(stops: Arc<AtomicUsize>) -> Self {
        Self {
            stops,
            ..Default::default()
        }
    }

    pub fn misbehaving(stops: Arc<AtomicUsize>, misbehave: Misbehave) -> Self {
        Self {
            stops,
            misbehave,
            ..Default::default()
        }
    }

    fn descriptor() -> Descriptor {
        Descriptor::new(NAME, "0.2.0")
            .with_inbound("file-monitor", 1, &["interval_ms", "recursive"], MONITOR)
            .with_outbound("file-state", 1)
    }
}

impl Plugin for FileAgent {
    fn start(&mut self, host: HostApi, _settings: &Settings) -> Result<Descriptor, PluginError> {
        self.host = Some(host);
        Ok(Self::descriptor())
    }

    fn status(&mut self) -> Result<Descriptor, PluginError> {
        Ok(Self::descriptor())
    }

    fn deliver(&mut self, handler: HandlerRef, request: &serde_json::Value) -> Result<(), PluginError> {
        if handler != MONITOR {
            return Err(PluginError::Rejected { handler, code: 22 });
        }
        let path = request["path"]
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| PluginError::Other("request has no path".into()))?;
        let kinds: BTreeSet<AttributeKind> = request["attributes"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|k| k.as_str()?.parse().ok())
            .collect();
        self.watched.push(path.clone());
        if self.misbehave.silent {
            return Ok(());
        }
        let Some(host) = self.host.clone() else {
            return Err(PluginError::Other("not started".into()));
        };
        for minor in 0..self.misbehave.burst {
            host.emit(Parcel::new(NAME, "host", "heartbeat", Sequence::new(0, minor)));
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        let misbehave = self.misbehave;
        self.workers.push(std::thread::spawn(move || {
            let payload = match capture(&path, &kinds) {
                Ok(snapshot) => serde_json::to_vec(&snapshot).unwrap_or_default(),
                Err(e) => format!("{{\"error\":\"{e}\"}}").into_bytes(),
            };
            let parcel = Parcel::new(NAME, "host", "file-state", Sequence::new(1, seq))
                .with_group(seq, Disposition::Last)
                .with_payload(Compression::None, payload);
            host.emit(parcel);
            if misbehave.regress_sequence {
                host.emit(Parcel::new(NAME, "host", "file-state", Sequence::new(1, 0)));
            }
            if misbehave.reuse_closed_group {
                host.emit(
                    Parcel::new(NAME, "host", "file-state", Sequence::new(2, 0))
                        .with_group(seq, Disposition::Part),
                );
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.host = None;
        let present = self.watched.iter().filter(|p| p.exists()).count();
        self.present_at_stop.fetch_add(present, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.misbehave.fail_stop {
            return Err(PluginError::Other("stop refused".into()));
        }
        Ok(())
    }
}
