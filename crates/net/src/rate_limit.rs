//! Sharded fixed-window rate limiter with LRU-bounded client tracking.
//!
//! Clients are keyed by an opaque identifier (typically the peer address).
//! Each client gets `quota` calls per `window`; windows reset lazily on the
//! first check after they elapse. The map is bounded: inserting past
//! `capacity` evicts the least-recently-used client. Shards cut producer
//! contention; every check touches exactly one shard mutex.

use std::hash::{BuildHasher, Hash, Hasher, RandomState};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{NetError, NetResult};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    /// True when the call may proceed.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tracked clients across all shards.
    pub capacity: usize,
    /// Window duration.
    pub window: Duration,
    /// Allowed calls per client per window.
    pub quota: u32,
    /// Shard count (contention knob, not a semantic one).
    pub shards: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            window: Duration::from_secs(1),
            quota: 100,
            shards: 8,
        }
    }
}

struct ClientWindow {
    window_index: u64,
    count: u32,
}

/// Sharded sliding-window limiter.
pub struct RateLimiter {
    shards: Box<[Mutex<LruCache<String, ClientWindow>>]>,
    hasher: RandomState,
    quota: u32,
    window_ms: u64,
    epoch: Instant,
}

impl RateLimiter {
    /// Builds a limiter; capacity is split evenly across shards.
    pub fn new(config: RateLimiterConfig) -> NetResult<Self> {
        if config.capacity == 0 || config.quota == 0 || config.shards == 0 {
            return Err(NetError::invalid_config(
                "rate limiter capacity, quota and shards must be non-zero",
            ));
        }
        if config.window.is_zero() {
            return Err(NetError::invalid_config(
                "rate limiter window must be non-zero",
            ));
        }
        let per_shard = config.capacity.div_ceil(config.shards).max(1);
        let per_shard = NonZeroUsize::new(per_shard)
            .ok_or_else(|| NetError::invalid_config("per-shard capacity must be non-zero"))?;
        let shards = (0..config.shards)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Ok(Self {
            shards,
            hasher: RandomState::new(),
            quota: config.quota,
            window_ms: config.window.as_millis().max(1) as u64,
            epoch: Instant::now(),
        })
    }

    /// Checks (and counts) one call by `client_id`.
    pub fn check(&self, client_id: &str) -> Decision {
        let shard = &self.shards[self.shard_for(client_id)];
        let window_index = self.current_window();

        let mut clients = shard.lock();
        if let Some(entry) = clients.get_mut(client_id) {
            if entry.window_index != window_index {
                // Lazy reset: first check in a new window starts over.
                entry.window_index = window_index;
                entry.count = 0;
            }
            if entry.count >= self.quota {
                return Decision::Denied;
            }
            entry.count += 1;
            return Decision::Allowed;
        }

        // New client; pushing past capacity evicts the LRU entry.
        clients.put(
            client_id.to_string(),
            ClientWindow {
                window_index,
                count: 1,
            },
        );
        Decision::Allowed
    }

    /// Clients currently tracked (across all shards).
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn shard_for(&self, client_id: &str) -> usize {
        let mut hasher = self.hasher.build_hasher();
        client_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn current_window(&self) -> u64 {
        (self.epoch.elapsed().as_millis() as u64) / self.window_ms
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("shards", &self.shards.len())
            .field("quota", &self.quota)
            .field("window_ms", &self.window_ms)
            .finish()
    }
}
