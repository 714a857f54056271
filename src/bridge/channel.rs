// CLASSIFICATION: COMMUNITY
// Filename: channel.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Capture channel between plugin threads and the scenario driver.
//!
//! The plugin side holds a [`HostApi`]; every clone feeds the same bounded
//! FIFO queue, so arrival order is preserved across threads. `emit` never
//! blocks: a parcel arriving at a full queue is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::parcel::Parcel;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time view of channel counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ChannelStats {
    pub accepted: u64,
    /// Parcels lost because the queue was full.
    pub dropped: u64,
    /// Parcels rejected at the ABI boundary before they became parcels.
    pub malformed: u64,
}

/// Emission handle given to a plugin at start. Cheap to clone, safe to call
/// from any thread and from inside a harness call into the plugin.
#[derive(Clone)]
pub struct HostApi {
    tx: SyncSender<Parcel>,
    counters: Arc<Counters>,
}

impl HostApi {
    pub fn emit(&self, parcel: Parcel) {
        debug!("emit {parcel}");
        match self.tx.try_send(parcel) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(parcel)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                warn!("capture buffer full; dropped {parcel}");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("capture closed; parcel discarded");
            }
        }
    }

    pub(crate) fn reject(&self, reason: &str) {
        self.counters.malformed.fetch_add(1, Ordering::SeqCst);
        warn!("rejected malformed parcel: {reason}");
    }
}

impl std::fmt::Debug for HostApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi").finish_non_exhaustive()
    }
}

/// Driver side of the channel.
pub struct CaptureReceiver {
    rx: Receiver<Parcel>,
    counters: Arc<Counters>,
    // Keeps the queue connected after the plugin drops its handles, so
    // waits time out instead of returning early.
    _keepalive: SyncSender<Parcel>,
}

impl CaptureReceiver {
    /// Take everything queued right now, in arrival order.
    pub fn drain(&self) -> Vec<Parcel> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(parcel) => out.push(parcel),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Wait up to `timeout` for the next parcel.
    pub fn wait_next(&self, timeout: Duration) -> Option<Parcel> {
        match self.rx.recv_timeout(timeout) {
            Ok(parcel) => Some(parcel),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            accepted: self.counters.accepted.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            malformed: self.counters.malformed.load(Ordering::SeqCst),
        }
    }
}

/// Create a channel holding at most `capacity` undrained parcels.
pub fn bounded(capacity: usize) -> (HostApi, CaptureReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let counters = Arc::new(Counters::default());
    let host = HostApi {
        tx: tx.clone(),
        counters: counters.clone(),
    };
    (
        host,
        CaptureReceiver {
            rx,
            counters,
            _keepalive: tx,
        },
    )
}
