//! Error types for mcpd-memory.

use thiserror::Error;

/// Memory management errors.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The underlying allocator returned null.
    #[error("memory allocation failed: {size} bytes")]
    AllocationFailed { size: usize },

    /// A size computation overflowed or a size parameter is out of range.
    #[error("invalid allocation size: {requested} bytes")]
    InvalidSize { requested: usize },

    /// A configuration parameter is null, zero, or otherwise unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The buffer pool free list is empty.
    #[error("buffer pool exhausted (capacity: {capacity})")]
    PoolExhausted { capacity: usize },
}

impl MemoryError {
    /// Stable error code for categorization and logging.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "MEM:ALLOC:FAILED",
            Self::InvalidSize { .. } => "MEM:ALLOC:SIZE",
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::PoolExhausted { .. } => "MEM:POOL:EXHAUSTED",
        }
    }

    /// True when retrying later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Create an allocation failed error.
    pub fn allocation_failed(size: usize) -> Self {
        Self::AllocationFailed { size }
    }

    /// Create an invalid size error.
    pub fn invalid_size(requested: usize) -> Self {
        Self::InvalidSize { requested }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(capacity: usize) -> Self {
        Self::PoolExhausted { capacity }
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            MemoryError::allocation_failed(64).code(),
            "MEM:ALLOC:FAILED"
        );
        assert_eq!(MemoryError::pool_exhausted(8).code(), "MEM:POOL:EXHAUSTED");
    }

    #[test]
    fn pool_exhaustion_is_retryable() {
        assert!(MemoryError::pool_exhausted(8).is_retryable());
        assert!(!MemoryError::invalid_size(usize::MAX).is_retryable());
    }
}
