//! The per-thread worker loop.
//!
//! A worker repeatedly drains its own deque (LIFO), then checks shutdown and
//! shrink flags, then tries to steal the oldest task from a random victim,
//! and finally backs off: a handful of scheduler yields, then a 100 ms
//! condvar sleep. Tasks always run to completion; cancellation is only ever
//! observed between tasks.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mcpd_memory::{Arena, current};
use tracing::{debug, warn};

use crate::deque::Stolen;
use crate::pool::{PoolShared, RUNNING, WorkerSlot};
use crate::task::Task;

/// Steal failures tolerated before the worker parks on the condvar.
const MAX_STEAL_ATTEMPTS: u32 = 5;

/// Condvar park timeout; bounds the latency of observing shutdown.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Where a task came from, for the per-worker counters.
enum TaskSource {
    OwnDeque,
    Stolen,
}

pub(crate) fn worker_main(shared: &Arc<PoolShared>, index: usize) {
    let slot = &shared.workers[index];

    // The worker's arena lives and dies with its thread; handlers reach it
    // through `mcpd_memory::current`. No lazy creation anywhere.
    let _arena = current::bind(Arena::with_block_size(shared.arena_block_size));

    debug!(worker = index, "worker started");
    let mut steal_attempts: u32 = 0;

    loop {
        if let Some(task) = slot.deque.pop() {
            steal_attempts = 0;
            run_task(shared, slot, task, &TaskSource::OwnDeque);
            continue;
        }

        // Structural state is read under the pool's read lock; the own deque
        // is empty here, which is exactly the graceful-exit condition.
        {
            let _structure = shared.structure.read();
            if shared.shutdown.load(Ordering::Acquire) != RUNNING {
                break;
            }
            if slot.should_exit.load(Ordering::Acquire) {
                break;
            }
        }

        match steal_from_random_victim(shared, index) {
            Stolen::Taken(task) => {
                steal_attempts = 0;
                run_task(shared, slot, task, &TaskSource::Stolen);
            }
            Stolen::Aborted => {
                // Lost a race: the victim had work, so retry right away.
                std::thread::yield_now();
            }
            Stolen::Empty => {
                steal_attempts += 1;
                if steal_attempts < MAX_STEAL_ATTEMPTS {
                    std::thread::yield_now();
                } else {
                    let mut guard = shared.sleep_lock.lock();
                    let _ = shared.sleep_cv.wait_for(&mut guard, IDLE_WAIT);
                }
            }
        }
    }

    debug!(
        worker = index,
        executed_own = slot.executed_own.load(Ordering::Relaxed),
        stolen = slot.stolen.load(Ordering::Relaxed),
        "worker exiting"
    );
}

/// Picks a victim uniformly among all slots except the worker's own.
///
/// The range is the full slot array, not the current logical size: a shrunk
/// worker may have left tasks behind in its deque, and those are drained by
/// whoever draws that slot.
fn steal_from_random_victim(shared: &PoolShared, self_index: usize) -> Stolen {
    let slots = shared.workers.len();
    if slots <= 1 {
        return Stolen::Empty;
    }
    let victim = loop {
        let v = fastrand::usize(..slots);
        if v != self_index {
            break v;
        }
    };
    shared.workers[victim].deque.steal()
}

fn run_task(shared: &PoolShared, slot: &WorkerSlot, task: Task, source: &TaskSource) {
    slot.is_active.store(true, Ordering::Relaxed);
    shared.active.fetch_add(1, Ordering::Relaxed);

    let outcome = catch_unwind(AssertUnwindSafe(|| task.run()));

    shared.active.fetch_sub(1, Ordering::Relaxed);
    slot.is_active.store(false, Ordering::Relaxed);

    match outcome {
        Ok(()) => {
            shared.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(_panic) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            warn!("task panicked; worker continues");
        }
    }

    match source {
        TaskSource::OwnDeque => slot.executed_own.fetch_add(1, Ordering::Relaxed),
        TaskSource::Stolen => slot.stolen.fetch_add(1, Ordering::Relaxed),
    };
}
