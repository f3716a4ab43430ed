//! Transport configuration.

use std::time::Duration;

use crate::error::{NetError, NetResult};

/// Default client slot count.
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Default frame size ceiling (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// TCP server transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface to bind.
    pub bind_host: String,
    /// Port to bind (0 picks an ephemeral port).
    pub bind_port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Client slot table size; connections past this are shed at accept.
    pub max_clients: usize,
    /// Frames with a larger length prefix drop the connection.
    pub max_message_size: usize,
    /// Idle connections are reaped after this long without a completed read.
    pub idle_timeout: Duration,
    /// How often the reaper scans the slot table.
    pub cleanup_interval: Duration,
    /// How often the monitor thread offers the pool a smart adjust.
    pub monitor_interval: Duration,
    /// Size of each pooled I/O buffer; larger frames fall back to the heap.
    pub buffer_size: usize,
    /// Number of pooled I/O buffers.
    pub buffer_count: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            backlog: 128,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(1),
            monitor_interval: Duration::from_secs(5),
            buffer_size: 64 * 1024,
            buffer_count: DEFAULT_MAX_CLIENTS,
        }
    }
}

impl TransportConfig {
    /// Rejects configurations the transport cannot run with.
    pub fn validate(&self) -> NetResult<()> {
        if self.max_clients == 0 {
            return Err(NetError::invalid_config("max_clients must be non-zero"));
        }
        if self.max_message_size == 0 {
            return Err(NetError::invalid_config("max_message_size must be non-zero"));
        }
        if self.buffer_size == 0 || self.buffer_count == 0 {
            return Err(NetError::invalid_config(
                "buffer_size and buffer_count must be non-zero",
            ));
        }
        if self.idle_timeout.is_zero() || self.cleanup_interval.is_zero() {
            return Err(NetError::invalid_config(
                "idle_timeout and cleanup_interval must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TransportConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_slots_are_rejected() {
        let config = TransportConfig {
            max_clients: 0,
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
