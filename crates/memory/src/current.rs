//! Explicit thread-local binding of a worker's arena.
//!
//! A pool worker binds its arena once at thread startup via [`bind`]; the
//! returned guard unbinds (and drops the arena) at worker exit. Handlers
//! running on that worker reach the arena through [`with`] without plumbing a
//! handle through every signature.
//!
//! There is deliberately no lazy initialization: binding off a pool worker is
//! an explicit act, and [`with`] panics when nothing is bound. Use
//! [`is_bound`] / [`try_with`] from code that must tolerate running on
//! foreign threads.

use std::cell::RefCell;

use crate::arena::Arena;

thread_local! {
    static CURRENT: RefCell<Option<Arena>> = const { RefCell::new(None) };
}

/// RAII guard returned by [`bind`]. Dropping it unbinds and drops the arena.
#[derive(Debug)]
pub struct BindGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        CURRENT.with(|slot| {
            slot.borrow_mut().take();
        });
    }
}

/// Binds `arena` to the current thread.
///
/// # Panics
///
/// Panics if an arena is already bound to this thread; binding is a
/// worker-startup act, not a nesting construct.
pub fn bind(arena: Arena) -> BindGuard {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(
            slot.is_none(),
            "an arena is already bound to this thread"
        );
        *slot = Some(arena);
    });
    BindGuard {
        _not_send: std::marker::PhantomData,
    }
}

/// True when the current thread has a bound arena.
#[must_use]
pub fn is_bound() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

/// Runs `f` with the bound arena.
///
/// # Panics
///
/// Panics when no arena is bound, i.e. when called off a pool worker.
pub fn with<R>(f: impl FnOnce(&Arena) -> R) -> R {
    CURRENT.with(|slot| {
        let slot = slot.borrow();
        let arena = slot
            .as_ref()
            .expect("no arena bound to this thread (not a pool worker?)");
        f(arena)
    })
}

/// Runs `f` with the bound arena, or returns `None` when nothing is bound.
pub fn try_with<R>(f: impl FnOnce(&Arena) -> R) -> Option<R> {
    CURRENT.with(|slot| {
        let slot = slot.borrow();
        slot.as_ref().map(f)
    })
}

/// Resets the bound arena.
///
/// # Panics
///
/// Panics when no arena is bound, or when arena references are still live
/// (a [`with`] call is on the stack).
pub fn reset() {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.as_mut()
            .expect("no arena bound to this thread (not a pool worker?)")
            .reset();
    });
}

/// Resets the bound arena if one exists; returns whether a reset happened.
pub fn try_reset() -> bool {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(arena) => {
                arena.reset();
                true
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;

    #[test]
    fn bind_and_query() {
        assert!(!is_bound());
        {
            let _guard = bind(Arena::new(ArenaConfig::default()));
            assert!(is_bound());
            let n = with(|arena| *arena.alloc(7_u64).unwrap());
            assert_eq!(n, 7);
        }
        assert!(!is_bound());
    }

    #[test]
    fn try_with_off_worker_returns_none() {
        assert_eq!(try_with(|_| ()), None);
        assert!(!try_reset());
    }

    #[test]
    fn reset_between_requests() {
        let _guard = bind(Arena::with_block_size(1024));
        with(|arena| {
            let _ = arena.alloc_str("request one").unwrap();
        });
        reset();
        let allocated = with(|arena| arena.stats().allocated_bytes);
        assert_eq!(allocated, 0);
    }

    #[test]
    #[should_panic(expected = "no arena bound")]
    fn with_panics_when_unbound() {
        with(|_| ());
    }

    #[test]
    fn binding_is_per_thread() {
        let _guard = bind(Arena::default());
        std::thread::spawn(|| {
            assert!(!is_bound());
        })
        .join()
        .unwrap();
    }
}
