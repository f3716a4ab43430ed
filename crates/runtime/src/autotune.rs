//! Load-reactive pool sizing.
//!
//! [`decide`] is the pure decision matrix; [`ThreadPool::smart_adjust`]
//! (crate::pool) samples signals, applies the matrix, and enforces the
//! cooldown. Keeping the matrix pure makes every row unit-testable without a
//! live pool.
//!
//! [`ThreadPool::smart_adjust`]: crate::pool::ThreadPool::smart_adjust

use sysinfo::System;

/// CPU usage above which the pool will not grow.
const CPU_GROW_CEILING: f32 = 80.0;
/// CPU usage above which an oversized pool shrinks back to optimal.
const CPU_OVERLOAD: f32 = 95.0;
/// Free memory required before growing.
const MEMORY_GROW_FLOOR: u64 = 100 * 1024 * 1024;
/// Free memory below which the pool sheds a worker.
const MEMORY_CRITICAL: u64 = 50 * 1024 * 1024;
/// Utilization above which the pool wants another worker.
const UTILIZATION_HIGH: f64 = 0.8;
/// Utilization below which a worker is surplus.
const UTILIZATION_LOW: f64 = 0.2;
/// Queue pressure above which the pool wants another worker.
const PRESSURE_HIGH: f64 = 0.6;
/// Queue pressure below which a worker is surplus.
const PRESSURE_LOW: f64 = 0.1;

/// A point-in-time reading of host load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    /// Global CPU usage, 0–100.
    pub cpu_percent: f32,
    /// Available physical memory in bytes.
    pub available_memory: u64,
}

/// Source of [`LoadSample`]s. Production uses [`SystemProbe`]; tests inject
/// hand-built samples.
pub trait LoadProbe: Send {
    fn sample(&mut self) -> LoadSample;
}

/// [`LoadProbe`] backed by `sysinfo`.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for SystemProbe {
    fn sample(&mut self) -> LoadSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        LoadSample {
            cpu_percent: self.system.global_cpu_usage(),
            available_memory: self.system.available_memory(),
        }
    }
}

/// Pool-side signals feeding the decision matrix.
#[derive(Debug, Clone, Copy)]
pub struct PoolSignals {
    /// Current logical worker count.
    pub current: usize,
    /// Resize floor.
    pub min: usize,
    /// Resize ceiling (the construction-time worker array length).
    pub max: usize,
    /// OS-derived optimal count (logical CPUs).
    pub optimal: usize,
    /// `active_tasks / current`.
    pub utilization: f64,
    /// `queued_tasks / total deque capacity`.
    pub queue_pressure: f64,
}

/// What smart adjust decided (and did).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// No change.
    None,
    /// Grow to `to` workers.
    Grow { to: usize },
    /// Shrink to `to` workers.
    Shrink { to: usize },
}

/// The decision matrix:
///
/// | Condition | Action |
/// |---|---|
/// | CPU < 80% and memory > 100 MiB and (utilization > 0.8 or pressure > 0.6) | grow by 1, capped at 1.5 × optimal |
/// | utilization < 0.2 and pressure < 0.1 and current > min | shrink by 1 |
/// | memory < 50 MiB and current > min | shrink by 1 |
/// | CPU > 95% and current > optimal | shrink to optimal |
/// | otherwise | no change |
#[must_use]
pub fn decide(sample: &LoadSample, signals: &PoolSignals) -> Adjustment {
    let grow_cap = ((signals.optimal * 3).div_ceil(2)).min(signals.max).max(1);

    let wants_more =
        signals.utilization > UTILIZATION_HIGH || signals.queue_pressure > PRESSURE_HIGH;
    if sample.cpu_percent < CPU_GROW_CEILING
        && sample.available_memory > MEMORY_GROW_FLOOR
        && wants_more
        && signals.current < grow_cap
    {
        return Adjustment::Grow {
            to: signals.current + 1,
        };
    }

    if signals.utilization < UTILIZATION_LOW
        && signals.queue_pressure < PRESSURE_LOW
        && signals.current > signals.min
    {
        return Adjustment::Shrink {
            to: signals.current - 1,
        };
    }

    if sample.available_memory < MEMORY_CRITICAL && signals.current > signals.min {
        return Adjustment::Shrink {
            to: signals.current - 1,
        };
    }

    if sample.cpu_percent > CPU_OVERLOAD && signals.current > signals.optimal {
        return Adjustment::Shrink {
            to: signals.optimal.max(signals.min),
        };
    }

    Adjustment::None
}
