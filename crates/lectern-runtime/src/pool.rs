//! Bounded worker pools for script execution.
//!
//! A pool owns a fixed set of core threads fed by a bounded queue. When the
//! queue is full the pool grows up to `max_workers` with transient threads
//! that exit after `keep_alive_ms` idle; beyond that the [`OverflowPolicy`]
//! decides between rejecting the job and running it on the caller's thread.
//!
//! Every submitted job carries a [`CancelToken`]. Shutdown stops intake,
//! waits for in-flight work for a grace period and then trips the tokens of
//! whatever is left.

use crate::error::{RuntimeResult, SubmitError};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Stack size for worker threads. Lua callbacks nest on the native stack.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cooperative cancellation flag shared between a caller and one job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to do when the queue is full and the pool cannot grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the submission with [`SubmitError::Rejected`].
    #[default]
    Reject,

    /// Run the job synchronously on the submitting thread.
    CallerRuns,
}

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name used for thread names and log fields.
    pub name: String,
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub keep_alive_ms: u64,
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "sandbox".to_string(),
            core_workers: 2,
            max_workers: 4,
            queue_capacity: 32,
            keep_alive_ms: 30_000,
            overflow: OverflowPolicy::Reject,
        }
    }
}

impl PoolConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Clamp values into a usable shape: at least one core worker, a
    /// non-empty queue and `max_workers >= core_workers`.
    pub fn normalized(mut self) -> Self {
        self.core_workers = self.core_workers.max(1);
        self.max_workers = self.max_workers.max(self.core_workers);
        self.queue_capacity = self.queue_capacity.max(1);
        self
    }
}

struct Task {
    id: u64,
    cancel: CancelToken,
    job: Job,
}

struct Shared {
    name: String,
    max_workers: usize,
    keep_alive: Duration,
    workers: AtomicUsize,
    spawned: AtomicU64,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    in_flight: Mutex<HashMap<u64, CancelToken>>,
}

impl Shared {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<u64, CancelToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a worker slot if the pool is below `max_workers`.
    fn try_reserve_worker(&self) -> bool {
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.max_workers).then_some(current + 1)
            })
            .is_ok()
    }
}

/// A bounded pool of worker threads.
pub struct WorkerPool {
    config: PoolConfig,
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool and spawn its core workers.
    pub fn new(config: PoolConfig) -> RuntimeResult<Self> {
        let config = config.normalized();
        let (sender, receiver) = bounded(config.queue_capacity);
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            max_workers: config.max_workers,
            keep_alive: Duration::from_millis(config.keep_alive_ms),
            workers: AtomicUsize::new(0),
            spawned: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            in_flight: Mutex::new(HashMap::new()),
        });

        let pool = Self {
            config,
            sender: Mutex::new(Some(sender)),
            receiver,
            shared,
        };
        for _ in 0..pool.config.core_workers {
            pool.shared.workers.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None, false)?;
        }

        info!(
            pool = %pool.config.name,
            core = pool.config.core_workers,
            max = pool.config.max_workers,
            queue = pool.config.queue_capacity,
            "Worker pool started"
        );
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Live worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Jobs accepted and not yet finished (queued or running).
    pub fn pending(&self) -> usize {
        self.shared.in_flight().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Submit a job.
    ///
    /// Returns once the job is queued, handed to a new worker, or (under
    /// [`OverflowPolicy::CallerRuns`]) finished on the calling thread.
    pub fn submit(&self, cancel: CancelToken, job: Job) -> Result<(), SubmitError> {
        if self.is_shut_down() {
            return Err(SubmitError::ShutDown(self.config.name.clone()));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.in_flight().insert(id, cancel.clone());
        let task = Task { id, cancel, job };

        let send_result = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) => sender.try_send(task),
                None => Err(TrySendError::Disconnected(task)),
            }
        };

        match send_result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => self.overflow(task),
            Err(TrySendError::Disconnected(task)) => {
                self.shared.in_flight().remove(&task.id);
                Err(SubmitError::ShutDown(self.config.name.clone()))
            }
        }
    }

    fn overflow(&self, task: Task) -> Result<(), SubmitError> {
        if self.shared.try_reserve_worker() {
            debug!(pool = %self.config.name, "Queue full, adding transient worker");
            let id = task.id;
            return self.spawn_worker(Some(task), true).map_err(|e| {
                error!(pool = %self.config.name, "Failed to spawn worker: {}", e);
                self.shared.in_flight().remove(&id);
                SubmitError::Rejected {
                    pool: self.config.name.clone(),
                    capacity: self.config.queue_capacity,
                }
            });
        }

        match self.config.overflow {
            OverflowPolicy::Reject => {
                self.shared.in_flight().remove(&task.id);
                warn!(pool = %self.config.name, "Queue full, rejecting execution");
                Err(SubmitError::Rejected {
                    pool: self.config.name.clone(),
                    capacity: self.config.queue_capacity,
                })
            }
            OverflowPolicy::CallerRuns => {
                debug!(pool = %self.config.name, "Queue full, running on caller thread");
                run_task(&self.shared, task);
                Ok(())
            }
        }
    }

    /// Spawn a worker. The caller must already have counted it in `workers`.
    fn spawn_worker(&self, first: Option<Task>, transient: bool) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let receiver = self.receiver.clone();
        let n = shared.spawned.fetch_add(1, Ordering::SeqCst);
        let result = thread::Builder::new()
            .name(format!("{}-worker-{}", self.config.name, n))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker_loop(shared, receiver, first, transient));

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.shared.workers.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop accepting work, wait up to `grace` for pending jobs, then cancel
    /// everything still in flight. Returns the number of cancelled jobs.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        // Dropping the sender lets workers drain the queue and exit.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let deadline = Instant::now() + grace;
        while self.pending() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let leftover: Vec<CancelToken> = self.shared.in_flight().values().cloned().collect();
        for token in &leftover {
            token.cancel();
        }
        info!(
            pool = %self.config.name,
            cancelled = leftover.len(),
            "Worker pool shut down"
        );
        leftover.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        for token in self.shared.in_flight().values() {
            token.cancel();
        }
    }
}

fn worker_loop(
    shared: Arc<Shared>,
    receiver: Receiver<Task>,
    first: Option<Task>,
    transient: bool,
) {
    if let Some(task) = first {
        run_task(&shared, task);
    }

    loop {
        let next = if transient {
            match receiver.recv_timeout(shared.keep_alive) {
                Ok(task) => Some(task),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            }
        } else {
            receiver.recv().ok()
        };
        match next {
            Some(task) => run_task(&shared, task),
            None => break,
        }
    }

    shared.workers.fetch_sub(1, Ordering::SeqCst);
    debug!(pool = %shared.name, transient, "Worker exiting");
}

fn run_task(shared: &Shared, task: Task) {
    let Task { id, cancel, job } = task;
    if cancel.is_cancelled() {
        // Dropping the job drops its result channel; the caller reports the
        // cancellation.
        debug!(pool = %shared.name, job = id, "Skipping cancelled job");
    } else if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(pool = %shared.name, job = id, "Job panicked");
    }
    shared.in_flight().remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn config(core: usize, max: usize, queue: usize, overflow: OverflowPolicy) -> PoolConfig {
        PoolConfig {
            name: "test".to_string(),
            core_workers: core,
            max_workers: max,
            queue_capacity: queue,
            keep_alive_ms: 50,
            overflow,
        }
    }

    #[test]
    fn test_normalized() {
        let cfg = config(0, 0, 0, OverflowPolicy::Reject).normalized();
        assert_eq!(cfg.core_workers, 1);
        assert_eq!(cfg.max_workers, 1);
        assert_eq!(cfg.queue_capacity, 1);
    }

    #[tokio::test]
    async fn test_runs_jobs() {
        let pool = WorkerPool::new(config(2, 2, 8, OverflowPolicy::Reject)).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.submit(CancelToken::new(), Box::new(move || tx.send(i).unwrap()))
                .unwrap();
        }
        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reject_when_saturated() {
        let pool = WorkerPool::new(config(1, 1, 1, OverflowPolicy::Reject)).unwrap();
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = mpsc::channel();

        // Occupy the only worker, then fill the queue.
        let rx = release_rx.clone();
        pool.submit(
            CancelToken::new(),
            Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = rx.recv();
            }),
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let rx = release_rx.clone();
        pool.submit(CancelToken::new(), Box::new(move || drop(rx.recv())))
            .unwrap();

        let err = pool
            .submit(CancelToken::new(), Box::new(|| {}))
            .unwrap_err();
        assert_eq!(
            err,
            SubmitError::Rejected {
                pool: "test".to_string(),
                capacity: 1
            }
        );

        drop(release_tx);
    }

    #[tokio::test]
    async fn test_caller_runs_when_saturated() {
        let pool = WorkerPool::new(config(1, 1, 1, OverflowPolicy::CallerRuns)).unwrap();
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = mpsc::channel();

        let rx = release_rx.clone();
        pool.submit(
            CancelToken::new(),
            Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = rx.recv();
            }),
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let rx = release_rx.clone();
        pool.submit(CancelToken::new(), Box::new(move || drop(rx.recv())))
            .unwrap();

        let caller = thread::current().id();
        let (ran_tx, ran_rx) = mpsc::channel();
        pool.submit(
            CancelToken::new(),
            Box::new(move || ran_tx.send(thread::current().id()).unwrap()),
        )
        .unwrap();
        assert_eq!(ran_rx.try_recv().unwrap(), caller);

        drop(release_tx);
    }

    #[tokio::test]
    async fn test_grows_to_max_workers() {
        let pool = WorkerPool::new(config(1, 2, 1, OverflowPolicy::Reject)).unwrap();
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = mpsc::channel();

        let rx = release_rx.clone();
        pool.submit(
            CancelToken::new(),
            Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = rx.recv();
            }),
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // One job fills the queue, the next one forces a transient worker.
        for _ in 0..2 {
            let rx = release_rx.clone();
            pool.submit(CancelToken::new(), Box::new(move || drop(rx.recv())))
                .unwrap();
        }
        assert_eq!(pool.worker_count(), 2);

        drop(release_tx);
        // The transient worker exits after keep-alive.
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.worker_count() > 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_job_keeps_worker() {
        let pool = WorkerPool::new(config(1, 1, 4, OverflowPolicy::Reject)).unwrap();
        pool.submit(CancelToken::new(), Box::new(|| panic!("boom")))
            .unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(CancelToken::new(), Box::new(move || tx.send(7).unwrap()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_leftovers_and_refuses_work() {
        let pool = WorkerPool::new(config(1, 1, 4, OverflowPolicy::Reject)).unwrap();
        let token = CancelToken::new();
        let observed = token.clone();
        pool.submit(
            token,
            Box::new(move || {
                while !observed.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
            }),
        )
        .unwrap();

        let cancelled = pool.shutdown(Duration::from_millis(50)).await;
        assert_eq!(cancelled, 1);
        assert_eq!(
            pool.submit(CancelToken::new(), Box::new(|| {})),
            Err(SubmitError::ShutDown("test".to_string()))
        );
    }
}
