//! # mcpd-runtime
//!
//! The execution core of the mcpd server: a fixed-ceiling thread pool whose
//! workers own Chase–Lev work-stealing deques and per-thread arenas.
//!
//! - [`WorkDeque`]: bounded lock-free ring; the owner works the bottom,
//!   thieves CAS the top.
//! - [`ThreadPool`]: round-robin submission, online resizing between a fixed
//!   minimum and the construction-time ceiling, and graceful shutdown.
//! - [`autotune`]: load-reactive resize decisions driven by CPU, memory,
//!   utilization and queue-pressure signals.
//!
//! Every worker binds an [`mcpd_memory::Arena`] to its thread at startup, so
//! request handlers running on the pool can parse into arena storage via
//! `mcpd_memory::current` without any plumbing.

// The deque slot array is manipulated through raw pointers.
#![allow(unsafe_code)]

pub mod autotune;
pub mod deque;
pub mod error;
pub mod pool;
pub mod task;
mod worker;

pub use crate::autotune::{Adjustment, LoadProbe, LoadSample, SystemProbe};
pub use crate::deque::{Stolen, WorkDeque};
pub use crate::error::{RuntimeError, RuntimeResult};
pub use crate::pool::{PoolConfig, PoolStats, ThreadPool, WorkerStats};
pub use crate::task::Task;

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::autotune::{Adjustment, LoadProbe, LoadSample, SystemProbe};
    pub use crate::error::{RuntimeError, RuntimeResult};
    pub use crate::pool::{PoolConfig, PoolStats, ThreadPool};
    pub use crate::task::Task;
}
