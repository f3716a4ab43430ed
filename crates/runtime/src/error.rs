//! Error types for mcpd-runtime.

use thiserror::Error;

/// Thread pool and scheduling errors.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Submission was rejected because shutdown has begun.
    #[error("thread pool is shutting down")]
    PoolShuttingDown,

    /// The selected worker's deque is at capacity.
    #[error("worker {worker_index} queue is full")]
    QueueFull { worker_index: usize },

    /// Spawning a worker thread failed.
    #[error("failed to spawn worker {worker_index}: {reason}")]
    SpawnFailed { worker_index: usize, reason: String },

    /// A worker thread could not be joined within the retry budget.
    #[error("worker {worker_index} did not join after {attempts} attempts")]
    ThreadJoinFailed { worker_index: usize, attempts: u32 },

    /// Shutdown was requested on an already-stopped pool.
    #[error("thread pool already stopped")]
    AlreadyStopped,

    /// A configuration parameter is zero or out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl RuntimeError {
    /// Stable error code for categorization and logging.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolShuttingDown => "RT:POOL:SHUTTING_DOWN",
            Self::QueueFull { .. } => "RT:POOL:QUEUE_FULL",
            Self::SpawnFailed { .. } => "RT:POOL:SPAWN_FAILED",
            Self::ThreadJoinFailed { .. } => "RT:POOL:JOIN_FAILED",
            Self::AlreadyStopped => "RT:POOL:ALREADY_STOPPED",
            Self::InvalidConfig { .. } => "RT:CONFIG:INVALID",
        }
    }

    /// True when the caller may retry (or shed load and retry later).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Create a queue-full error.
    #[must_use]
    pub fn queue_full(worker_index: usize) -> Self {
        Self::QueueFull { worker_index }
    }

    /// Create a spawn-failed error.
    pub fn spawn_failed(worker_index: usize, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            worker_index,
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = core::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(RuntimeError::PoolShuttingDown.code(), "RT:POOL:SHUTTING_DOWN");
        assert_eq!(RuntimeError::queue_full(3).code(), "RT:POOL:QUEUE_FULL");
    }

    #[test]
    fn queue_full_is_retryable() {
        assert!(RuntimeError::queue_full(0).is_retryable());
        assert!(!RuntimeError::AlreadyStopped.is_retryable());
    }
}
