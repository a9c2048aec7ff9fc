//! Preparation thread pool.
//!
//! Resource preparation blocks on media-layer signals (metadata, seek), so it
//! runs here instead of on the tick thread. Work-stealing deques keep idle
//! threads busy; an epoch counter shared with the cache lets `clear()` drop
//! every job that has not started yet.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::traits::WorkerPool;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool with a global injector plus per-thread FIFO deques.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    /// Jobs queued or running
    in_flight: Arc<AtomicUsize>,
}

impl Workers {
    /// Spawn `num_threads` (min 1) workers sharing `epoch` with the cache.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(Worker::stealer).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let in_flight = Arc::clone(&in_flight);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("clipline-prep-{}", worker_id))
                .spawn(move || run_worker(worker_id, local, &injector, &stealers, &shutdown, &in_flight))?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads", num_threads);

        Ok(Self {
            injector,
            handles,
            current_epoch: epoch,
            shutdown,
            in_flight,
        })
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Jobs queued or still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run `f` on a worker thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(f));
    }

    /// Run `f` only if the epoch still equals `epoch` when a worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.execute(move || {
            if current_epoch.load(Ordering::Relaxed) == epoch {
                f();
            } else {
                trace!("Skipping stale job (epoch {})", epoch);
            }
        });
    }

    /// Block until no jobs are in flight or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

fn run_worker(
    worker_id: usize,
    local: Worker<Job>,
    injector: &Injector<Job>,
    stealers: &[Stealer<Job>],
    shutdown: &AtomicBool,
    in_flight: &AtomicUsize,
) {
    trace!("Worker {} started", worker_id);
    loop {
        let job = local
            .pop()
            .or_else(|| injector.steal_batch_and_pop(&local).success())
            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

        match job {
            Some(job) => {
                job();
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            None if shutdown.load(Ordering::Relaxed) => break,
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    trace!("Worker {} stopped", worker_id);
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // Preparation can sit in a media-layer wait; don't hang teardown on it
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped", num_threads);
    }
}

impl WorkerPool for Workers {
    fn execute_with_epoch(&self, epoch: u64, f: Box<dyn FnOnce() + Send + 'static>) {
        Workers::execute_with_epoch(self, epoch, f)
    }
}

/// Runs jobs immediately on the calling thread. Deterministic; used in tests
/// and for single-threaded hosts that accept blocking preparation.
#[derive(Debug)]
pub struct InlinePool {
    current_epoch: Arc<AtomicU64>,
}

impl InlinePool {
    pub fn new(epoch: Arc<AtomicU64>) -> Self {
        Self {
            current_epoch: epoch,
        }
    }
}

impl WorkerPool for InlinePool {
    fn execute_with_epoch(&self, epoch: u64, f: Box<dyn FnOnce() + Send + 'static>) {
        if self.current_epoch.load(Ordering::Relaxed) == epoch {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_jobs_on_workers() {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(2, epoch).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            workers.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(workers.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(workers.threads(), 2);
    }

    #[test]
    fn stale_epoch_jobs_are_skipped() {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(1, Arc::clone(&epoch)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        // Bump the epoch before enqueueing a job tagged with the old one
        epoch.store(1, Ordering::SeqCst);
        let flag = Arc::clone(&ran);
        workers.execute_with_epoch(0, move || flag.store(true, Ordering::SeqCst));
        assert!(workers.wait_idle(Duration::from_secs(5)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn inline_pool_respects_epoch() {
        let epoch = Arc::new(AtomicU64::new(3));
        let pool = InlinePool::new(Arc::clone(&epoch));
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        pool.execute_with_epoch(3, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let h = Arc::clone(&hits);
        pool.execute_with_epoch(2, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
