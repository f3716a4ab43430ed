//! Bounded free list of fixed-size byte buffers for socket I/O.
//!
//! The pool never allocates past its configured count; an empty free list is
//! a [`MemoryError::PoolExhausted`] and the caller decides whether to shed
//! load or fall back to an ad-hoc heap buffer.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{MemoryError, MemoryResult};

/// Fixed-size buffer pool with a mutex-protected LIFO free list.
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    buffer_size: usize,
    capacity: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool of `count` buffers of `buffer_size` bytes each.
    pub fn new(buffer_size: usize, count: usize) -> MemoryResult<Arc<Self>> {
        if buffer_size == 0 {
            return Err(MemoryError::invalid_config("buffer size must be non-zero"));
        }
        if count == 0 {
            return Err(MemoryError::invalid_config("buffer count must be non-zero"));
        }
        let free = (0..count)
            .map(|_| vec![0_u8; buffer_size].into_boxed_slice())
            .collect();
        Ok(Arc::new(Self {
            free: Mutex::new(free),
            buffer_size,
            capacity: count,
            outstanding: AtomicUsize::new(0),
        }))
    }

    /// Pops a buffer from the free list.
    ///
    /// Returns [`MemoryError::PoolExhausted`] when none is available; the
    /// pool never allocates on demand, bounded memory being the point.
    pub fn acquire(self: &Arc<Self>) -> MemoryResult<PooledBuffer> {
        let data = self
            .free
            .lock()
            .pop()
            .ok_or(MemoryError::pool_exhausted(self.capacity))?;
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(PooledBuffer {
            data: ManuallyDrop::new(data),
            pool: Arc::clone(self),
        })
    }

    /// Size of every buffer in the pool.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Configured buffer count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn release(&self, data: Box<[u8]>) {
        debug_assert_eq!(data.len(), self.buffer_size);
        self.free.lock().push(data);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let remaining = self.free.get_mut().len();
        if remaining != self.capacity {
            // Can only happen when a guard was leaked (e.g. mem::forget).
            warn!(
                leaked = self.capacity - remaining,
                capacity = self.capacity,
                "buffer pool destroyed with unreturned buffers"
            );
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// RAII guard over a pooled buffer; returns it to its pool on drop.
pub struct PooledBuffer {
    data: ManuallyDrop<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // SAFETY: `data` is taken exactly once, here; the guard is gone after.
        let data = unsafe { ManuallyDrop::take(&mut self.data) };
        self.pool.release(data);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}
