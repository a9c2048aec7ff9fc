//! Abstract traits for dependency inversion.
//!
//! These traits define the interfaces the engine needs from the host:
//! - `MediaProvider` - the decode/seek layer that owns real media resources
//! - `WorkerPool` - where asynchronous resource preparation runs
//! - `Clock` - the wall clock used for gap advancement
//!
//! Implementations live in `core/` (workers, clocks, simulated media layer)
//! or in the embedding application.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::MediaError;

/// Opaque handle to a prepared, seekable decoder instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle(pub u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// One-shot readiness signal from the media layer (metadata loaded, seek complete).
///
/// Sticky: once observed as fired it stays fired. A sender dropped without
/// firing reads as "never fired", which callers treat like a timeout.
#[derive(Debug)]
pub struct Signal {
    rx: Receiver<()>,
    fired: AtomicBool,
}

/// Firing side of a [`Signal`].
#[derive(Debug)]
pub struct SignalSender(Sender<()>);

impl SignalSender {
    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

impl Signal {
    pub fn pair() -> (SignalSender, Signal) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            SignalSender(tx),
            Signal {
                rx,
                fired: AtomicBool::new(false),
            },
        )
    }

    /// Signal that is already fired.
    pub fn fired() -> Signal {
        let (tx, signal) = Self::pair();
        tx.fire();
        signal
    }

    /// Non-blocking check. Safe to call every tick.
    pub fn is_set(&self) -> bool {
        if self.fired.load(Ordering::Acquire) {
            return true;
        }
        if self.rx.try_recv().is_ok() {
            self.fired.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Block up to `timeout`. Returns false on timeout or abandoned sender.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {
                self.fired.store(true, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }
}

/// Freshly opened resource plus its "metadata ready" signal.
#[derive(Debug)]
pub struct Opened {
    pub handle: ResourceHandle,
    pub metadata: Signal,
}

/// Media Source Provider boundary.
///
/// All calls are non-blocking; readiness is reported through [`Signal`]s.
/// The cache is the only caller of `open`/`close`; the synchronizer drives
/// `seek`/`play`/`pause`/`current_position` on the handle it was lent.
pub trait MediaProvider: Send + Sync {
    fn open(&self, path: &Path) -> Result<Opened, MediaError>;

    /// Start a seek. The returned signal fires on "seek complete".
    fn seek(&self, handle: ResourceHandle, seconds: f64) -> Result<Signal, MediaError>;

    /// Resource's own playback position in source seconds.
    fn current_position(&self, handle: ResourceHandle) -> Result<f64, MediaError>;

    fn play(&self, handle: ResourceHandle) -> Result<(), MediaError>;

    fn pause(&self, handle: ResourceHandle) -> Result<(), MediaError>;

    /// Tear down the resource. Unknown handles are ignored.
    fn close(&self, handle: ResourceHandle);
}

/// Abstract worker pool interface.
///
/// Allows the cache to schedule preparation without knowing
/// the concrete thread pool implementation.
pub trait WorkerPool: Send + Sync {
    /// Execute closure on worker thread with epoch-based cancellation.
    ///
    /// If epoch changed before execution, the closure is skipped.
    fn execute_with_epoch(&self, epoch: u64, f: Box<dyn FnOnce() + Send + 'static>);
}

/// Monotonic time source in seconds from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}
