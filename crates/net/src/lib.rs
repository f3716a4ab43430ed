//! # mcpd-net
//!
//! The network layer of the mcpd server:
//!
//! - [`socket`]: listener creation, interruptible accept, exact-length I/O.
//! - [`framing`]: the 4-byte big-endian length-prefixed wire framing.
//! - [`rate_limit`]: a sharded, LRU-bounded fixed-window rate limiter.
//! - [`transport`]: the TCP server transport: accept loop, client slot
//!   table, idle reaper, and per-connection handler tasks running on the
//!   work-stealing pool.
//!
//! Connection-level errors drop one connection; the transport keeps serving
//! the others.

pub mod error;
pub mod framing;
pub mod rate_limit;
pub mod socket;
pub mod transport;

pub use crate::error::{NetError, NetResult};
pub use crate::rate_limit::{Decision, RateLimiter, RateLimiterConfig};
pub use crate::transport::config::TransportConfig;
pub use crate::transport::{
    ConnectionInfo, MessageOutcome, ServerTransport, TransportHandler, TransportStats,
};

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::error::{NetError, NetResult};
    pub use crate::rate_limit::{Decision, RateLimiter, RateLimiterConfig};
    pub use crate::transport::config::TransportConfig;
    pub use crate::transport::{
        ConnectionInfo, MessageOutcome, ServerTransport, TransportHandler, TransportStats,
    };
}
