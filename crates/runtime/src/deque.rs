//! Bounded Chase–Lev work-stealing deque.
//!
//! The ring has a power-of-two capacity and two logical ends: the *bottom*,
//! worked by the deque's owner (and by submitters placing new tasks), and the
//! *top*, advanced only by a compare-and-swap so that any number of thieves
//! can race for the oldest task.
//!
//! The top end follows the classic lock-free protocol: slot reads happen
//! before the CAS, a lost CAS is reported as [`Stolen::Aborted`] (distinct
//! from [`Stolen::Empty`] so callers do not spin on a permanently empty
//! deque), and `SeqCst` fences order the `bottom`/`top` loads in `pop` and
//! `steal` against each other.
//!
//! The bottom end is serialized by a short mutex. The C lineage of this
//! structure let any submitter thread write `bottom` behind volatile stores;
//! expressed with Rust atomics that interleaving would let two bottom-end
//! writers claim the same slot and duplicate task ownership, so bottom-end
//! exclusivity is enforced instead of assumed. Thieves never touch the lock.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicIsize, Ordering, fence};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::task::Task;

/// Outcome of a [`WorkDeque::steal`] attempt.
#[derive(Debug)]
pub enum Stolen {
    /// The oldest task was taken.
    Taken(Task),
    /// The deque was empty at the time of the attempt.
    Empty,
    /// Another thread won the race; retrying may yield a task.
    Aborted,
}

/// A deque slot. Thieves read slots concurrently with the owner, so the cell
/// must be shareable; the indexing protocol guarantees a slot is never
/// written while a thief may read it.
struct SlotCell(UnsafeCell<MaybeUninit<Task>>);

// SAFETY: concurrent access is governed by the top/bottom protocol above.
// A slot is written only at indexes outside the window thieves can observe,
// and ownership of the contained task transfers through exactly one
// successful pop or CAS-confirmed steal.
unsafe impl Sync for SlotCell {}

/// Bounded lock-free work-stealing deque of [`Task`]s.
pub struct WorkDeque {
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
    /// Serializes bottom-end writers (owner pop and submitter pushes).
    bottom_lock: Mutex<()>,
    slots: Box<[SlotCell]>,
    mask: isize,
}

impl WorkDeque {
    /// Creates a deque with at least `capacity` slots, rounded up to the
    /// next power of two (minimum 2) so slot indexing can use a mask.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| SlotCell(UnsafeCell::new(MaybeUninit::uninit())))
            .collect();
        Self {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            bottom_lock: Mutex::new(()),
            slots,
            mask: capacity as isize - 1,
        }
    }

    /// Slot count of the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot of the number of queued tasks. Racy by nature; suitable for
    /// occupancy polling and pressure metrics only.
    #[must_use]
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).clamp(0, self.mask + 1) as usize
    }

    /// True when the occupancy snapshot is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn slot(&self, index: isize) -> *mut MaybeUninit<Task> {
        self.slots[(index & self.mask) as usize].0.get()
    }

    /// Pushes a task at the bottom. Returns the task back when the deque is
    /// full so the caller can shed load.
    pub fn push(&self, task: Task) -> Result<(), Task> {
        let _guard = self.bottom_lock.lock();
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b - t >= self.capacity() as isize {
            return Err(task);
        }
        // SAFETY: `b - t < capacity`, so slot `b mod capacity` is outside the
        // window `[top, bottom)` that thieves may read.
        unsafe {
            (*self.slot(b)).write(task);
        }
        // Publish after the slot write; thieves acquire `bottom`.
        self.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Pops the newest task (LIFO). Owner side of the bottom end.
    pub fn pop(&self) -> Option<Task> {
        let _guard = self.bottom_lock.lock();
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        // Speculatively take the slot, then look at `top`.
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if b < t {
            // Empty: restore the canonical `top == bottom` state.
            self.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        if b > t {
            // More than one task; the slot is unreachable by thieves.
            // SAFETY: slot `b` was initialized by a push and is released from
            // the ring by moving `bottom` below it.
            return Some(unsafe { self.take(b) });
        }

        // Last task: race the thieves for it via CAS on `top`.
        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(t + 1, Ordering::Relaxed);
        if won {
            // SAFETY: the CAS excluded every thief from slot `t == b`.
            Some(unsafe { self.take(b) })
        } else {
            None
        }
    }

    /// Steals the oldest task (FIFO). Any thread but the owner.
    pub fn steal(&self) -> Stolen {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if t >= b {
            return Stolen::Empty;
        }
        // Read the slot before the CAS. On a lost race the bitwise copy is
        // discarded without dropping (`MaybeUninit` has no drop glue), so the
        // task is never duplicated.
        // SAFETY: `t < b` keeps slot `t mod capacity` clear of concurrent
        // writes; push can only reuse it after `top` has moved past `t`.
        let candidate = unsafe { self.slot(t).read() };
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            // SAFETY: the CAS transferred ownership of the initialized slot.
            Stolen::Taken(unsafe { candidate.assume_init() })
        } else {
            Stolen::Aborted
        }
    }

    /// Moves the task out of `slots[index mod capacity]`.
    ///
    /// # Safety
    ///
    /// The slot must hold an initialized task that no other thread can still
    /// claim.
    unsafe fn take(&self, index: isize) -> Task {
        // SAFETY: forwarded from the caller contract.
        unsafe { self.slot(index).read().assume_init() }
    }
}

impl Drop for WorkDeque {
    fn drop(&mut self) {
        // Remaining tasks are dropped, not run.
        while self.pop().is_some() {}
    }
}

impl std::fmt::Debug for WorkDeque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDeque")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Task::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn capacity_rounds_to_power_of_two() {
        assert_eq!(WorkDeque::new(0).capacity(), 2);
        assert_eq!(WorkDeque::new(5).capacity(), 8);
        assert_eq!(WorkDeque::new(8).capacity(), 8);
    }

    #[test]
    fn owner_pops_lifo() {
        let deque = WorkDeque::new(8);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            deque
                .push(Task::new(move || order.lock().push(i)))
                .unwrap_or_else(|_| panic!("push {i} failed"));
        }
        while let Some(task) = deque.pop() {
            task.run();
        }
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn thieves_steal_fifo() {
        let deque = WorkDeque::new(8);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            deque
                .push(Task::new(move || order.lock().push(i)))
                .unwrap_or_else(|_| panic!("push {i} failed"));
        }
        loop {
            match deque.steal() {
                Stolen::Taken(task) => task.run(),
                Stolen::Empty => break,
                Stolen::Aborted => {}
            }
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn full_deque_rejects_push() {
        let counter = Arc::new(AtomicUsize::new(0));
        let deque = WorkDeque::new(4);
        for _ in 0..4 {
            assert!(deque.push(counting_task(&counter)).is_ok());
        }
        assert!(deque.push(counting_task(&counter)).is_err());
        // Draining one slot makes room again.
        deque.pop().unwrap().run();
        assert!(deque.push(counting_task(&counter)).is_ok());
    }

    #[test]
    fn steal_on_empty_reports_empty() {
        let deque = WorkDeque::new(4);
        assert!(matches!(deque.steal(), Stolen::Empty));
        assert!(deque.pop().is_none());
        assert!(deque.is_empty());
    }

    #[test]
    fn window_invariant_holds() {
        let counter = Arc::new(AtomicUsize::new(0));
        let deque = WorkDeque::new(4);
        assert_eq!(deque.len(), 0);
        for expected in 1..=4 {
            deque.push(counting_task(&counter)).map_err(drop).unwrap();
            assert_eq!(deque.len(), expected);
        }
        deque.pop().unwrap().run();
        assert_eq!(deque.len(), 3);
    }

    #[test]
    fn every_task_runs_exactly_once_under_contention() {
        const TASKS: usize = 10_000;
        const THIEVES: usize = 3;

        let deque = Arc::new(WorkDeque::new(64));
        let executed = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let thieves: Vec<_> = (0..THIEVES)
            .map(|_| {
                let deque = Arc::clone(&deque);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    loop {
                        match deque.steal() {
                            Stolen::Taken(task) => task.run(),
                            Stolen::Aborted => {}
                            Stolen::Empty => {
                                if done.load(Ordering::Acquire) && deque.is_empty() {
                                    break;
                                }
                                std::thread::yield_now();
                            }
                        }
                    }
                })
            })
            .collect();

        let mut pushed = 0;
        while pushed < TASKS {
            match deque.push(counting_task(&executed)) {
                Ok(()) => pushed += 1,
                Err(_rejected) => {
                    // Full: act as the owner and help drain.
                    if let Some(task) = deque.pop() {
                        task.run();
                    }
                }
            }
            if pushed % 7 == 0 {
                if let Some(task) = deque.pop() {
                    task.run();
                }
            }
        }
        done.store(true, Ordering::Release);
        while let Some(task) = deque.pop() {
            task.run();
        }
        for thief in thieves {
            thief.join().unwrap();
        }
        assert_eq!(executed.load(Ordering::Relaxed), TASKS);
    }

    #[test]
    fn dropping_a_loaded_deque_drops_tasks() {
        use std::sync::atomic::AtomicUsize;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let deque = WorkDeque::new(8);
            for _ in 0..5 {
                let guard = DropCounter(Arc::clone(&drops));
                deque
                    .push(Task::new(move || {
                        let _held = &guard;
                    }))
                    .map_err(drop)
                    .unwrap();
            }
        }
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }
}
