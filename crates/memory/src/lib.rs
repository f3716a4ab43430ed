//! # mcpd-memory
//!
//! Memory primitives for the mcpd server runtime:
//!
//! - [`Arena`]: a thread-unsafe bump allocator with chained blocks. One arena
//!   exists per pool worker; it is reset between requests so per-request JSON
//!   parsing never touches the global heap for node storage.
//! - [`current`]: explicit thread-local binding of a worker's arena. Binding
//!   happens once at worker startup; there is no lazy initialization.
//! - [`BufferPool`]: a bounded free list of fixed-size byte buffers used for
//!   socket I/O.
//!
//! Allocation failure is reported to the caller and never aborts; an arena
//! remains usable after a failed allocation.

// Bump allocation manipulates raw pointers.
#![allow(unsafe_code)]

pub mod arena;
pub mod buffer_pool;
pub mod current;
pub mod error;
mod utils;

pub use crate::arena::{Arena, ArenaConfig, ArenaStats};
pub use crate::buffer_pool::{BufferPool, PooledBuffer};
pub use crate::error::{MemoryError, MemoryResult};

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::arena::{Arena, ArenaConfig, ArenaStats};
    pub use crate::buffer_pool::{BufferPool, PooledBuffer};
    pub use crate::error::{MemoryError, MemoryResult};
}
