//! Simulated media layer.
//!
//! Stand-in `MediaProvider` for headless runs and tests: resources are plain
//! position counters that advance with a shared [`Clock`] while playing.
//! Failure modes (open errors, slow metadata, stalled seeks, refused play)
//! can be switched on per provider or per path.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::entities::media::MediaLibrary;
use crate::entities::traits::{Clock, MediaProvider, Opened, ResourceHandle, Signal, SignalSender};
use crate::error::MediaError;

#[derive(Debug)]
struct SimResource {
    path: PathBuf,
    duration: f64,
    /// Position at the last seek/pause
    base: f64,
    /// Clock time playback started, if playing
    playing_since: Option<f64>,
}

impl SimResource {
    fn position(&self, now: f64) -> f64 {
        let pos = match self.playing_since {
            Some(since) => self.base + (now - since).max(0.0),
            None => self.base,
        };
        pos.min(self.duration)
    }
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    resources: HashMap<ResourceHandle, SimResource>,
    durations: HashMap<PathBuf, f64>,
    failing: HashSet<PathBuf>,
    refuse_play: HashSet<PathBuf>,
    metadata_delay: Option<Duration>,
    stall_metadata: bool,
    stall_seeks: bool,
    /// Senders kept alive so stalled signals time out instead of disconnecting
    held: Vec<SignalSender>,
}

pub struct SimulatedProvider {
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    seeks: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(SimState::default()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            seeks: AtomicUsize::new(0),
        }
    }

    /// Provider that knows every source in `library`.
    pub fn from_library(library: &MediaLibrary, clock: Arc<dyn Clock>) -> Self {
        let provider = Self::new(clock);
        for source in library.iter() {
            provider.register(source.path.clone(), source.duration);
        }
        provider
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, path: impl Into<PathBuf>, duration: f64) {
        self.lock().durations.insert(path.into(), duration);
    }

    pub fn set_failing(&self, path: impl AsRef<Path>, failing: bool) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.lock();
        if failing {
            state.failing.insert(path);
        } else {
            state.failing.remove(&path);
        }
    }

    pub fn set_refuse_play(&self, path: impl AsRef<Path>, refuse: bool) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.lock();
        if refuse {
            state.refuse_play.insert(path);
        } else {
            state.refuse_play.remove(&path);
        }
    }

    /// Fire "metadata loaded" from a helper thread after `delay`.
    pub fn set_metadata_delay(&self, delay: Option<Duration>) {
        self.lock().metadata_delay = delay;
    }

    pub fn set_stall_metadata(&self, stall: bool) {
        self.lock().stall_metadata = stall;
    }

    pub fn set_stall_seeks(&self, stall: bool) {
        self.lock().stall_seeks = stall;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn position(&self, handle: ResourceHandle) -> Option<f64> {
        let now = self.clock.now();
        self.lock().resources.get(&handle).map(|r| r.position(now))
    }

    pub fn is_playing(&self, handle: ResourceHandle) -> bool {
        self.lock()
            .resources
            .get(&handle)
            .is_some_and(|r| r.playing_since.is_some())
    }

    /// Handles currently playing.
    pub fn playing(&self) -> Vec<ResourceHandle> {
        self.lock()
            .resources
            .iter()
            .filter(|(_, r)| r.playing_since.is_some())
            .map(|(h, _)| *h)
            .collect()
    }
}

impl MediaProvider for SimulatedProvider {
    fn open(&self, path: &Path) -> Result<Opened, MediaError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if state.failing.contains(path) {
            return Err(MediaError::Open {
                path: path.to_path_buf(),
                reason: "simulated failure".into(),
            });
        }
        let Some(&duration) = state.durations.get(path) else {
            return Err(MediaError::Open {
                path: path.to_path_buf(),
                reason: "no such source".into(),
            });
        };

        state.next_handle += 1;
        let handle = ResourceHandle(state.next_handle);
        state.resources.insert(
            handle,
            SimResource {
                path: path.to_path_buf(),
                duration,
                base: 0.0,
                playing_since: None,
            },
        );

        let (tx, metadata) = Signal::pair();
        if state.stall_metadata {
            state.held.push(tx);
        } else if let Some(delay) = state.metadata_delay {
            thread::spawn(move || {
                thread::sleep(delay);
                tx.fire();
            });
        } else {
            tx.fire();
        }
        trace!("sim: opened {} as {}", path.display(), handle);
        Ok(Opened { handle, metadata })
    }

    fn seek(&self, handle: ResourceHandle, seconds: f64) -> Result<Signal, MediaError> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        let mut state = self.lock();
        let stall = state.stall_seeks;
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(MediaError::UnknownHandle(handle))?;

        resource.base = seconds.clamp(0.0, resource.duration);
        if resource.playing_since.is_some() {
            resource.playing_since = Some(now);
        }

        let (tx, signal) = Signal::pair();
        if stall {
            state.held.push(tx);
        } else {
            tx.fire();
        }
        Ok(signal)
    }

    fn current_position(&self, handle: ResourceHandle) -> Result<f64, MediaError> {
        self.position(handle).ok_or(MediaError::UnknownHandle(handle))
    }

    fn play(&self, handle: ResourceHandle) -> Result<(), MediaError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let refused = state
            .resources
            .get(&handle)
            .is_some_and(|r| state.refuse_play.contains(&r.path));
        if refused {
            return Err(MediaError::Decode("simulated play refusal".into()));
        }
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(MediaError::UnknownHandle(handle))?;
        if resource.playing_since.is_none() {
            resource.playing_since = Some(now);
        }
        Ok(())
    }

    fn pause(&self, handle: ResourceHandle) -> Result<(), MediaError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(MediaError::UnknownHandle(handle))?;
        resource.base = resource.position(now);
        resource.playing_since = None;
        Ok(())
    }

    fn close(&self, handle: ResourceHandle) {
        if self.lock().resources.remove(&handle).is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
            trace!("sim: closed {}", handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn provider() -> (Arc<ManualClock>, SimulatedProvider) {
        let clock = Arc::new(ManualClock::new(0.0));
        let sim = SimulatedProvider::new(clock.clone());
        sim.register("/m/a.mp4", 4.0);
        (clock, sim)
    }

    #[test]
    fn position_follows_clock_while_playing() {
        let (clock, sim) = provider();
        let opened = sim.open(Path::new("/m/a.mp4")).unwrap();
        assert!(opened.metadata.is_set());
        let h = opened.handle;

        assert!(sim.seek(h, 1.0).unwrap().is_set());
        sim.play(h).unwrap();
        clock.advance(1.5);
        assert_eq!(sim.current_position(h).unwrap(), 2.5);

        sim.pause(h).unwrap();
        clock.advance(1.0);
        assert_eq!(sim.current_position(h).unwrap(), 2.5);

        sim.play(h).unwrap();
        clock.advance(10.0);
        assert_eq!(sim.current_position(h).unwrap(), 4.0);
    }

    #[test]
    fn unknown_and_failing_paths() {
        let (_, sim) = provider();
        assert!(matches!(sim.open(Path::new("/m/none.mp4")), Err(MediaError::Open { .. })));
        sim.set_failing("/m/a.mp4", true);
        assert!(sim.open(Path::new("/m/a.mp4")).is_err());
        assert_eq!(sim.opens(), 2);
        assert_eq!(
            sim.current_position(ResourceHandle(99)),
            Err(MediaError::UnknownHandle(ResourceHandle(99)))
        );
    }

    #[test]
    fn stalled_signals_time_out() {
        let (_, sim) = provider();
        sim.set_stall_metadata(true);
        sim.set_stall_seeks(true);
        let opened = sim.open(Path::new("/m/a.mp4")).unwrap();
        assert!(!opened.metadata.wait(Duration::from_millis(5)));
        assert!(!sim.seek(opened.handle, 2.0).unwrap().wait(Duration::from_millis(5)));
        // Position still moved
        assert_eq!(sim.position(opened.handle), Some(2.0));
    }

    #[test]
    fn refused_play_and_close() {
        let (_, sim) = provider();
        sim.set_refuse_play("/m/a.mp4", true);
        let h = sim.open(Path::new("/m/a.mp4")).unwrap().handle;
        assert!(sim.play(h).is_err());
        assert!(!sim.is_playing(h));
        sim.close(h);
        sim.close(h);
        assert_eq!(sim.closes(), 1);
        assert_eq!(sim.open_handles(), 0);
    }
}
