//! Prepared media resource cache with LRU eviction
//!
//! Keeps a small pool of open, pre-seeked decoder instances so clip
//! transitions don't wait on open+seek.
//!
//! - Keys are per source path, plus the clip id under `KeyStrategy::PerClip`
//!   so overlapping trims of one file get independently positioned handles
//! - Preparation runs on a `WorkerPool`: open -> metadata signal -> seek ->
//!   seek-complete signal, each wait bounded; a timeout degrades to Ready
//! - Duplicate `prepare` calls for a key coalesce into one in-flight job
//! - Ready+Loading entries are capped; the oldest `last_access` goes first,
//!   never the pinned (actively driven) entry
//! - `clear()` bumps the epoch so queued jobs are skipped; jobs already
//!   running close their resource when they find their entry gone

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, trace, warn};

use crate::config::{CacheConfig, KeyStrategy};
use crate::entities::clip::ClipId;
use crate::entities::traits::{MediaProvider, ResourceHandle, WorkerPool};
use crate::error::{EngineError, EngineResult};

/// Cache key: source path, optionally narrowed to one clip.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: PathBuf,
    pub clip: Option<ClipId>,
}

impl CacheKey {
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            source: path.into(),
            clip: None,
        }
    }

    pub fn clip(path: impl Into<PathBuf>, clip: ClipId) -> Self {
        Self {
            source: path.into(),
            clip: Some(clip),
        }
    }

    pub fn for_strategy(strategy: KeyStrategy, path: &Path, clip: ClipId) -> Self {
        match strategy {
            KeyStrategy::PerClip => Self::clip(path, clip),
            KeyStrategy::PerSource => Self::source(path),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.clip {
            Some(clip) => write!(f, "{}@{}", self.source.display(), clip),
            None => write!(f, "{}", self.source.display()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Loading,
    Ready,
    /// Last preparation failed; the entry itself is gone from the pool
    Failed,
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub handle: Option<ResourceHandle>,
    pub state: EntryState,
    pub last_access: u64,
    pub seek_hint: f64,
    generation: u64,
}

/// Result of [`MediaResourceCache::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready(ResourceHandle),
    /// Preparation started or in flight; retry next tick
    Pending,
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Metadata/seek waits that hit their timeout
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: IndexMap<CacheKey, CacheEntry>,
    access_clock: u64,
    next_generation: u64,
    pinned: Option<CacheKey>,
    failures: HashMap<CacheKey, (Instant, String)>,
}

impl Inner {
    fn next_access(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Evict oldest entries until within `capacity`. Pinned and `protect`
    /// are never chosen. Returns handles the caller must close.
    fn enforce_capacity(&mut self, capacity: usize, protect: &CacheKey, stats: &CacheStats) -> Vec<ResourceHandle> {
        let mut to_close = Vec::new();
        while self.entries.len() > capacity {
            let victim = self
                .entries
                .values()
                .filter(|e| &e.key != protect && Some(&e.key) != self.pinned.as_ref())
                .min_by_key(|e| e.last_access)
                .map(|e| e.key.clone());
            let Some(victim) = victim else {
                warn!(
                    "Resource cache over capacity ({} > {}) with nothing evictable",
                    self.entries.len(),
                    capacity
                );
                break;
            };
            if let Some(entry) = self.entries.shift_remove(&victim) {
                debug!("LRU evicted: {} ({:?}, access {})", victim, entry.state, entry.last_access);
                CacheStats::bump(&stats.evictions);
                to_close.extend(entry.handle);
            }
        }
        to_close
    }
}

struct Timeouts {
    metadata: Duration,
    seek: Duration,
}

/// Keyed pool of prepared media resources.
pub struct MediaResourceCache {
    provider: Arc<dyn MediaProvider>,
    pool: Arc<dyn WorkerPool>,
    inner: Arc<Mutex<Inner>>,
    epoch: Arc<AtomicU64>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
}

impl fmt::Debug for MediaResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaResourceCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("key_strategy", &self.config.key_strategy)
            .finish()
    }
}

impl MediaResourceCache {
    /// `epoch` must be the counter the `pool` checks before running a job.
    pub fn new(
        config: CacheConfig,
        provider: Arc<dyn MediaProvider>,
        pool: Arc<dyn WorkerPool>,
        epoch: Arc<AtomicU64>,
    ) -> Self {
        debug!(
            "MediaResourceCache created: capacity={}, keys={:?}",
            config.capacity.max(1),
            config.key_strategy
        );
        Self {
            provider,
            pool,
            inner: Arc::new(Mutex::new(Inner::default())),
            epoch,
            config,
            stats: Arc::new(CacheStats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn provider(&self) -> &Arc<dyn MediaProvider> {
        &self.provider
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }

    pub fn key_strategy(&self) -> KeyStrategy {
        self.config.key_strategy
    }

    /// Key for `clip` playing `path` under the configured strategy.
    pub fn key_for(&self, path: &Path, clip: ClipId) -> CacheKey {
        CacheKey::for_strategy(self.config.key_strategy, path, clip)
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Ready handle now, or `Pending` after kicking off preparation.
    ///
    /// Bumps `last_access` on every hit. A key that failed within the retry
    /// backoff is reported `Pending` without re-preparing.
    pub fn acquire(&self, key: &CacheKey, seek_hint: f64) -> Acquire {
        {
            let mut inner = self.lock();
            let access = inner.next_access();
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.last_access = access;
                return match (entry.state, entry.handle) {
                    (EntryState::Ready, Some(handle)) => {
                        CacheStats::bump(&self.stats.hits);
                        Acquire::Ready(handle)
                    }
                    _ => Acquire::Pending,
                };
            }
            CacheStats::bump(&self.stats.misses);
            if let Some((at, _)) = inner.failures.get(key)
                && at.elapsed() < self.config.retry_backoff()
            {
                trace!("Acquire {}: in failure backoff", key);
                return Acquire::Pending;
            }
        }

        self.prepare(key, seek_hint);

        // An inline pool may already have finished
        match self.handle(key) {
            Some(handle) => Acquire::Ready(handle),
            None => Acquire::Pending,
        }
    }

    /// Begin asynchronous preparation. No-op if the key is Loading or Ready.
    pub fn prepare(&self, key: &CacheKey, seek_hint: f64) {
        let (generation, to_close) = {
            let mut inner = self.lock();
            if inner.entries.contains_key(key) {
                trace!("Prepare {}: already pooled", key);
                return;
            }
            inner.failures.remove(key);
            let generation = inner.next_generation();
            let access = inner.next_access();
            inner.entries.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    handle: None,
                    state: EntryState::Loading,
                    last_access: access,
                    seek_hint,
                    generation,
                },
            );
            let to_close = inner.enforce_capacity(self.capacity(), key, &self.stats);
            (generation, to_close)
        };
        self.close_all(to_close);

        debug!("Preparing {} (seek hint {:.3}s)", key, seek_hint);
        let job = PrepareJob {
            provider: Arc::clone(&self.provider),
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
            key: key.clone(),
            generation,
            seek_hint,
            timeouts: self.timeouts(),
        };
        let epoch = self.epoch.load(Ordering::Relaxed);
        self.pool.execute_with_epoch(epoch, Box::new(move || job.run()));
    }

    /// Synchronous best-effort load on the calling thread.
    ///
    /// Returns the Ready handle if pooled; otherwise prepares inline and
    /// inserts the result as Ready, superseding any in-flight job for the key.
    pub fn load_blocking(&self, key: &CacheKey, seek_hint: f64) -> EngineResult<ResourceHandle> {
        {
            let mut inner = self.lock();
            let access = inner.next_access();
            if let Some(entry) = inner.entries.get_mut(key)
                && entry.state == EntryState::Ready
                && let Some(handle) = entry.handle
            {
                entry.last_access = access;
                CacheStats::bump(&self.stats.hits);
                return Ok(handle);
            }
        }

        debug!("Blocking load {} (seek hint {:.3}s)", key, seek_hint);
        let handle = match prepare_resource(self.provider.as_ref(), &key.source, seek_hint, &self.timeouts(), &self.stats) {
            Ok(handle) => handle,
            Err(err) => {
                let mut inner = self.lock();
                inner.entries.shift_remove(key);
                inner.failures.insert(key.clone(), (Instant::now(), err.to_string()));
                CacheStats::bump(&self.stats.failures);
                return Err(err);
            }
        };

        let to_close = {
            let mut inner = self.lock();
            let generation = inner.next_generation();
            let access = inner.next_access();
            inner.failures.remove(key);
            let previous = inner.entries.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    handle: Some(handle),
                    state: EntryState::Ready,
                    last_access: access,
                    seek_hint,
                    generation,
                },
            );
            let mut to_close = inner.enforce_capacity(self.capacity(), key, &self.stats);
            to_close.extend(previous.and_then(|p| p.handle));
            to_close
        };
        self.close_all(to_close);
        Ok(handle)
    }

    /// Mark `key` as just used. Returns false if not pooled.
    pub fn touch(&self, key: &CacheKey) -> bool {
        let mut inner = self.lock();
        let access = inner.next_access();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = access;
                true
            }
            None => false,
        }
    }

    /// Protect one entry (the actively driven one) from eviction.
    pub fn pin(&self, key: Option<&CacheKey>) {
        self.lock().pinned = key.cloned();
    }

    pub fn pinned(&self) -> Option<CacheKey> {
        self.lock().pinned.clone()
    }

    /// Tear down and forget one entry.
    pub fn release(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut inner = self.lock();
            if inner.pinned.as_ref() == Some(key) {
                inner.pinned = None;
            }
            inner.entries.shift_remove(key)
        };
        match removed {
            Some(entry) => {
                debug!("Released {}", key);
                self.close_all(entry.handle.into_iter().collect());
                true
            }
            None => false,
        }
    }

    /// Tear down every resource and abort queued preparation.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let entries = {
            let mut inner = self.lock();
            inner.pinned = None;
            inner.failures.clear();
            std::mem::take(&mut inner.entries)
        };
        let count = entries.len();
        self.close_all(entries.into_values().filter_map(|e| e.handle).collect());
        info!("Resource cache cleared ({} entries)", count);
    }

    pub fn state(&self, key: &CacheKey) -> Option<EntryState> {
        let inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) => Some(entry.state),
            None if inner.failures.contains_key(key) => Some(EntryState::Failed),
            None => None,
        }
    }

    /// Handle of a Ready entry (does not bump access).
    pub fn handle(&self, key: &CacheKey) -> Option<ResourceHandle> {
        self.lock()
            .entries
            .get(key)
            .filter(|e| e.state == EntryState::Ready)
            .and_then(|e| e.handle)
    }

    pub fn last_error(&self, key: &CacheKey) -> Option<String> {
        self.lock().failures.get(key).map(|(_, msg)| msg.clone())
    }

    /// Pooled keys, least recently used first.
    pub fn keys_by_age(&self) -> Vec<CacheKey> {
        let inner = self.lock();
        let mut entries: Vec<&CacheEntry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.last_access);
        entries.into_iter().map(|e| e.key.clone()).collect()
    }

    /// Ready + Loading entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            metadata: self.config.metadata_timeout(),
            seek: self.config.seek_timeout(),
        }
    }

    fn close_all(&self, handles: Vec<ResourceHandle>) {
        for handle in handles {
            trace!("Closing {}", handle);
            self.provider.close(handle);
        }
    }
}

/// One preparation, owned by a worker.
struct PrepareJob {
    provider: Arc<dyn MediaProvider>,
    inner: Arc<Mutex<Inner>>,
    stats: Arc<CacheStats>,
    key: CacheKey,
    generation: u64,
    seek_hint: f64,
    timeouts: Timeouts,
}

impl PrepareJob {
    fn run(self) {
        let outcome = prepare_resource(
            self.provider.as_ref(),
            &self.key.source,
            self.seek_hint,
            &self.timeouts,
            &self.stats,
        );

        let orphan = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let current = inner.entries.get(&self.key).map(|e| e.generation) == Some(self.generation);
            match (current, outcome) {
                (true, Ok(handle)) => {
                    if let Some(entry) = inner.entries.get_mut(&self.key) {
                        entry.handle = Some(handle);
                        entry.state = EntryState::Ready;
                    }
                    debug!("Ready: {} -> {}", self.key, handle);
                    None
                }
                (true, Err(err)) => {
                    inner.entries.shift_remove(&self.key);
                    inner.failures.insert(self.key.clone(), (Instant::now(), err.to_string()));
                    CacheStats::bump(&self.stats.failures);
                    warn!("Preparation failed for {}: {}", self.key, err);
                    None
                }
                // Evicted, released or cleared while we worked
                (false, Ok(handle)) => Some(handle),
                (false, Err(_)) => None,
            }
        };

        if let Some(handle) = orphan {
            trace!("Discarding orphaned preparation {} ({})", self.key, handle);
            self.provider.close(handle);
        }
    }
}

/// open -> metadata -> seek -> seek complete. Timeouts degrade, errors fail.
fn prepare_resource(
    provider: &dyn MediaProvider,
    path: &Path,
    seek_hint: f64,
    timeouts: &Timeouts,
    stats: &CacheStats,
) -> EngineResult<ResourceHandle> {
    let opened = provider.open(path).map_err(|e| EngineError::ResourceOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !opened.metadata.wait(timeouts.metadata) {
        CacheStats::bump(&stats.timeouts);
        warn!(
            "{}",
            EngineError::SeekTimeout {
                path: path.to_path_buf(),
                stage: "metadata",
                waited_ms: timeouts.metadata.as_millis() as u64,
            }
        );
    }

    let seeked = match provider.seek(opened.handle, seek_hint) {
        Ok(signal) => signal,
        Err(err) => {
            provider.close(opened.handle);
            return Err(err.into());
        }
    };
    if !seeked.wait(timeouts.seek) {
        CacheStats::bump(&stats.timeouts);
        warn!(
            "{}",
            EngineError::SeekTimeout {
                path: path.to_path_buf(),
                stage: "seek",
                waited_ms: timeouts.seek.as_millis() as u64,
            }
        );
    }

    Ok(opened.handle)
}
