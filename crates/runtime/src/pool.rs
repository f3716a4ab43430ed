//! Fixed-ceiling work-stealing thread pool.
//!
//! The worker slot array is allocated once at construction and never
//! reallocated; its length is the hard ceiling for [`resize`]. Shrinking
//! marks the top workers with `should_exit`, growing respawns threads into
//! their pre-allocated slots. Per-slot statistics are cumulative across
//! respawns, so totals are never double-counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::autotune::{self, Adjustment, LoadSample, PoolSignals};
use crate::deque::WorkDeque;
use crate::error::{RuntimeError, RuntimeResult};
use crate::task::Task;
use crate::worker;

/// Pool shutdown states.
pub(crate) const RUNNING: u8 = 0;
pub(crate) const SHUTDOWN_IMMEDIATE: u8 = 1;
pub(crate) const SHUTDOWN_GRACEFUL: u8 = 2;

/// Join retry budget applied to every worker at shutdown.
const JOIN_ATTEMPTS: u32 = 3;
const JOIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Occupancy poll interval used by [`ThreadPool::wait`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum delay between two smart-adjust resizes.
const ADJUST_COOLDOWN: Duration = Duration::from_secs(30);

/// Thread pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Initial worker count; also the hard ceiling for resize.
    pub thread_count: usize,
    /// Per-worker deque capacity, rounded up to a power of two.
    pub queue_capacity: usize,
    /// Floor for resize and smart adjust.
    pub min_thread_count: usize,
    /// Block size of each worker's arena (0 = implementation default).
    pub arena_block_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            thread_count: optimal_thread_count(),
            queue_capacity: 1024,
            min_thread_count: 1,
            arena_block_size: 0,
        }
    }
}

/// The OS-derived "right" worker count: logical CPUs.
#[must_use]
pub fn optimal_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// One pre-allocated worker slot. Slots outlive the threads occupying them.
pub(crate) struct WorkerSlot {
    pub(crate) deque: WorkDeque,
    pub(crate) executed_own: AtomicU64,
    pub(crate) stolen: AtomicU64,
    pub(crate) is_active: AtomicBool,
    pub(crate) should_exit: AtomicBool,
}

impl WorkerSlot {
    fn new(queue_capacity: usize) -> Self {
        Self {
            deque: WorkDeque::new(queue_capacity),
            executed_own: AtomicU64::new(0),
            stolen: AtomicU64::new(0),
            is_active: AtomicBool::new(false),
            should_exit: AtomicBool::new(false),
        }
    }
}

/// Structural fields guarded by the pool's read-write lock.
pub(crate) struct Structure {
    pub(crate) thread_count: usize,
    handles: Vec<Option<JoinHandle<()>>>,
}

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    pub(crate) workers: Box<[WorkerSlot]>,
    pub(crate) structure: RwLock<Structure>,
    pub(crate) shutdown: AtomicU8,
    next_submit: AtomicUsize,
    /// The condvar has its own mutex: you cannot wait on a condition
    /// variable through a read-write lock.
    pub(crate) sleep_lock: Mutex<()>,
    pub(crate) sleep_cv: Condvar,
    /// Serializes resize and shutdown against each other.
    maintenance: Mutex<()>,
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) active: AtomicU64,
    pub(crate) arena_block_size: usize,
}

/// Aggregate counters and per-worker totals, as returned by
/// [`ThreadPool::stats`].
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub active: u64,
    pub queued: usize,
    pub thread_count: usize,
    pub workers: Vec<WorkerStats>,
}

/// Per-worker execution totals. Cumulative over every thread that has
/// occupied the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub index: usize,
    /// Total tasks run by this slot (`executed_own + stolen`).
    pub executed: u64,
    /// Tasks popped from the slot's own deque.
    pub executed_own: u64,
    /// Tasks stolen from other slots.
    pub stolen: u64,
    pub is_active: bool,
}

/// Work-stealing thread pool. Created once, stopped once; a stopped pool
/// cannot be restarted.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    min_thread_count: usize,
    last_adjust: Mutex<Option<Instant>>,
}

impl ThreadPool {
    /// Builds the pool and spawns `config.thread_count` workers.
    ///
    /// On partial spawn failure every started worker is shut down and joined
    /// (with the usual retry budget) before the error is returned.
    pub fn new(config: PoolConfig) -> RuntimeResult<Self> {
        if config.thread_count == 0 {
            return Err(RuntimeError::invalid_config("thread_count must be non-zero"));
        }
        if config.queue_capacity == 0 {
            return Err(RuntimeError::invalid_config(
                "queue_capacity must be non-zero",
            ));
        }
        if config.min_thread_count == 0 || config.min_thread_count > config.thread_count {
            return Err(RuntimeError::invalid_config(
                "min_thread_count must be in 1..=thread_count",
            ));
        }

        let max = config.thread_count;
        let workers: Box<[WorkerSlot]> = (0..max)
            .map(|_| WorkerSlot::new(config.queue_capacity))
            .collect();

        let shared = Arc::new(PoolShared {
            workers,
            structure: RwLock::new(Structure {
                thread_count: 0,
                handles: (0..max).map(|_| None).collect(),
            }),
            shutdown: AtomicU8::new(RUNNING),
            next_submit: AtomicUsize::new(0),
            sleep_lock: Mutex::new(()),
            sleep_cv: Condvar::new(),
            maintenance: Mutex::new(()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            active: AtomicU64::new(0),
            arena_block_size: config.arena_block_size,
        });

        for index in 0..max {
            match spawn_worker(&shared, index) {
                Ok(handle) => {
                    let mut structure = shared.structure.write();
                    structure.handles[index] = Some(handle);
                    structure.thread_count = index + 1;
                }
                Err(err) => {
                    warn!(worker = index, error = %err, "worker spawn failed; aborting pool startup");
                    shared.shutdown.store(SHUTDOWN_IMMEDIATE, Ordering::Release);
                    shared.sleep_cv.notify_all();
                    let handles = take_handles(&shared);
                    for (joined_index, handle) in handles {
                        let _ = join_with_retry(handle, joined_index);
                    }
                    return Err(err);
                }
            }
        }

        info!(
            threads = max,
            queue_capacity = shared.workers[0].deque.capacity(),
            "thread pool started"
        );

        Ok(Self {
            shared,
            min_thread_count: config.min_thread_count,
            last_adjust: Mutex::new(None),
        })
    }

    /// Submits a job to the pool.
    ///
    /// The target deque is chosen round-robin over the current logical
    /// worker count; a full deque surfaces [`RuntimeError::QueueFull`] to the
    /// caller, which may retry or shed load. No second deque is attempted.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> RuntimeResult<()> {
        let structure = self.shared.structure.read();
        if self.shared.shutdown.load(Ordering::Acquire) != RUNNING {
            return Err(RuntimeError::PoolShuttingDown);
        }
        let count = structure.thread_count;
        // Never reset on shrink; the modulo over a smaller divisor skews
        // distribution slightly and that is accepted.
        let index = self.shared.next_submit.fetch_add(1, Ordering::Relaxed) % count;

        match self.shared.workers[index].deque.push(Task::new(job)) {
            Ok(()) => {
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                drop(structure);
                self.shared.sleep_cv.notify_one();
                Ok(())
            }
            Err(_rejected) => Err(RuntimeError::queue_full(index)),
        }
    }

    /// Current logical worker count.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.structure.read().thread_count
    }

    /// Hard ceiling fixed at construction.
    #[must_use]
    pub fn max_thread_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Resizes the pool to `target` workers, clamped to
    /// `[min_thread_count, max_thread_count]`. Returns the resulting count.
    ///
    /// Shrinking flags the top workers and wakes them; they exit at their
    /// next idle check. Growing respawns threads into their retained slots; a
    /// spawn failure rolls the count back to whatever actually started.
    pub fn resize(&self, target: usize) -> RuntimeResult<usize> {
        let _maintenance = self.shared.maintenance.lock();
        if self.shared.shutdown.load(Ordering::Acquire) != RUNNING {
            return Err(RuntimeError::PoolShuttingDown);
        }

        let max = self.shared.workers.len();
        let target = target.clamp(self.min_thread_count, max);

        let (current, stale_handles) = {
            let mut structure = self.shared.structure.write();
            let current = structure.thread_count;
            if target == current {
                return Ok(current);
            }
            if target < current {
                for slot in &self.shared.workers[target..current] {
                    slot.should_exit.store(true, Ordering::Release);
                }
                structure.thread_count = target;
                drop(structure);
                self.shared.sleep_cv.notify_all();
                info!(from = current, to = target, "pool shrunk");
                return Ok(target);
            }
            // Growing: reap handles of previously shrunk workers first, so a
            // slot is never occupied by two threads.
            let stale: Vec<(usize, JoinHandle<()>)> = (current..target)
                .filter_map(|i| structure.handles[i].take().map(|h| (i, h)))
                .collect();
            (current, stale)
        };

        self.shared.sleep_cv.notify_all();
        let mut grow_limit = target;
        for (index, handle) in stale_handles {
            if join_with_retry(handle, index).is_err() {
                // The previous occupant may still be alive; leave its slot
                // alone (it still has should_exit set and will wind down).
                grow_limit = grow_limit.min(index);
            }
        }

        let mut started = current;
        for index in current..grow_limit {
            self.shared.workers[index]
                .should_exit
                .store(false, Ordering::Release);
            match spawn_worker(&self.shared, index) {
                Ok(handle) => {
                    let mut structure = self.shared.structure.write();
                    structure.handles[index] = Some(handle);
                    structure.thread_count = index + 1;
                    started = index + 1;
                }
                Err(err) => {
                    warn!(worker = index, error = %err, "spawn failed during grow; rolled back");
                    break;
                }
            }
        }
        info!(from = current, to = started, "pool grown");
        Ok(started)
    }

    /// Applies the load-reactive decision matrix, honoring the 30 s
    /// cooldown. Returns what was done.
    pub fn smart_adjust(&self, sample: &LoadSample) -> Adjustment {
        {
            let last = self.last_adjust.lock();
            if let Some(prev) = *last {
                if prev.elapsed() < ADJUST_COOLDOWN {
                    return Adjustment::None;
                }
            }
        }

        let current = self.thread_count();
        let signals = PoolSignals {
            current,
            min: self.min_thread_count,
            max: self.max_thread_count(),
            optimal: optimal_thread_count(),
            utilization: self.utilization(current),
            queue_pressure: self.queue_pressure(current),
        };
        let decision = autotune::decide(sample, &signals);

        let target = match decision {
            Adjustment::None => return Adjustment::None,
            Adjustment::Grow { to } | Adjustment::Shrink { to } => to,
        };
        match self.resize(target) {
            Ok(_) => {
                *self.last_adjust.lock() = Some(Instant::now());
                debug!(?decision, cpu = sample.cpu_percent, "smart adjust applied");
                decision
            }
            Err(err) => {
                warn!(error = %err, "smart adjust resize failed");
                Adjustment::None
            }
        }
    }

    /// Fraction of current workers running a task right now.
    fn utilization(&self, current: usize) -> f64 {
        if current == 0 {
            return 0.0;
        }
        self.shared.active.load(Ordering::Relaxed) as f64 / current as f64
    }

    /// Queued tasks over the total capacity of the current deques.
    fn queue_pressure(&self, current: usize) -> f64 {
        if current == 0 {
            return 0.0;
        }
        let queued: usize = self.shared.workers.iter().map(|w| w.deque.len()).sum();
        let capacity = self.shared.workers[0].deque.capacity() * current;
        queued as f64 / capacity as f64
    }

    /// Polls deque occupancy every 10 ms until the pool is idle (no queued
    /// and no active tasks) or the timeout expires. Returns whether the pool
    /// drained.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let queued: usize = self.shared.workers.iter().map(|w| w.deque.len()).sum();
            let active = self.shared.active.load(Ordering::Relaxed);
            if queued == 0 && active == 0 {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Begins graceful shutdown and joins every worker.
    ///
    /// Each worker exits once its own deque is empty; queued work left on
    /// the deque of a worker that exited earlier is drained by the others
    /// before they exit (stealing covers all slots). A worker that cannot be
    /// joined within the retry budget is logged and detached, because freeing
    /// memory a live thread may still touch is the worse alternative.
    ///
    /// A second call returns [`RuntimeError::AlreadyStopped`].
    pub fn shutdown(&self) -> RuntimeResult<()> {
        let _maintenance = self.shared.maintenance.lock();
        if self
            .shared
            .shutdown
            .compare_exchange(RUNNING, SHUTDOWN_GRACEFUL, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::AlreadyStopped);
        }
        self.shared.sleep_cv.notify_all();

        let handles = take_handles(&self.shared);
        for (index, handle) in handles {
            // Join failures are logged inside and tolerated; shutdown never
            // hangs on a stuck worker.
            let _ = join_with_retry(handle, index);
        }

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            "thread pool stopped"
        );
        for w in &stats.workers {
            debug!(
                worker = w.index,
                executed = w.executed,
                stolen = w.stolen,
                "worker totals"
            );
        }
        Ok(())
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire) != RUNNING
    }

    /// Snapshot of aggregate counters and per-worker totals.
    ///
    /// The snapshot is taken slot by slot and may be transiently
    /// inconsistent while tasks are in flight; in a quiescent pool
    /// `submitted == completed + failed` and `queued == 0`.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let workers: Vec<WorkerStats> = self
            .shared
            .workers
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let executed_own = slot.executed_own.load(Ordering::Relaxed);
                let stolen = slot.stolen.load(Ordering::Relaxed);
                WorkerStats {
                    index,
                    executed: executed_own + stolen,
                    executed_own,
                    stolen,
                    is_active: slot.is_active.load(Ordering::Relaxed),
                }
            })
            .collect();
        PoolStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            active: self.shared.active.load(Ordering::Relaxed),
            queued: self.shared.workers.iter().map(|w| w.deque.len()).sum(),
            thread_count: self.thread_count(),
            workers,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("thread_count", &self.thread_count())
            .field("max_thread_count", &self.max_thread_count())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<PoolShared>, index: usize) -> RuntimeResult<JoinHandle<()>> {
    let cloned = Arc::clone(shared);
    std::thread::Builder::new()
        .name(format!("mcpd-worker-{index}"))
        .spawn(move || worker::worker_main(&cloned, index))
        .map_err(|err| RuntimeError::spawn_failed(index, err.to_string()))
}

fn take_handles(shared: &Arc<PoolShared>) -> Vec<(usize, JoinHandle<()>)> {
    let mut structure = shared.structure.write();
    structure
        .handles
        .iter_mut()
        .enumerate()
        .filter_map(|(index, slot)| slot.take().map(|handle| (index, handle)))
        .collect()
}

/// Joins `handle`, polling readiness up to three times 100 ms apart. An
/// unresponsive worker is detached and reported, never waited on forever.
fn join_with_retry(handle: JoinHandle<()>, index: usize) -> RuntimeResult<()> {
    for attempt in 1..JOIN_ATTEMPTS {
        if handle.is_finished() {
            break;
        }
        debug!(worker = index, attempt, "worker not finished; retrying join");
        std::thread::sleep(JOIN_RETRY_DELAY);
    }
    if handle.is_finished() {
        if handle.join().is_err() {
            warn!(worker = index, "worker thread panicked at exit");
        }
        return Ok(());
    }
    warn!(
        worker = index,
        attempts = JOIN_ATTEMPTS,
        "worker did not exit in time; detaching (its memory is leaked)"
    );
    drop(handle);
    Err(RuntimeError::ThreadJoinFailed {
        worker_index: index,
        attempts: JOIN_ATTEMPTS,
    })
}
