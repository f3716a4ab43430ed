//! Daemon configuration: a JSON file with every key optional, plus CLI
//! overrides applied on top.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use mcpd_net::{RateLimiterConfig, TransportConfig};
use mcpd_runtime::PoolConfig;

/// On-disk configuration. Missing keys fall back to defaults, so `{}` is a
/// valid config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind_host: String,
    /// Port to bind.
    pub bind_port: u16,
    /// Client slot table size.
    pub max_clients: usize,
    /// Frame size ceiling in bytes.
    pub max_message_size: usize,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
    /// Worker threads (0 = number of logical CPUs).
    pub thread_count: usize,
    /// Per-worker task queue capacity.
    pub queue_capacity: usize,
    /// Size of each pooled I/O buffer in bytes.
    pub buffer_pool_size: usize,
    /// Number of pooled I/O buffers.
    pub buffer_count: usize,
    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,
}

/// Rate limiter section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Maximum tracked clients before LRU eviction.
    pub capacity: usize,
    pub window_ms: u64,
    /// Allowed requests per client per window.
    pub quota: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 9275,
            max_clients: 64,
            max_message_size: 1024 * 1024,
            idle_timeout_ms: 60_000,
            thread_count: 0,
            queue_capacity: 1024,
            buffer_pool_size: 64 * 1024,
            buffer_count: 64,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1024,
            window_ms: 1000,
            quota: 100,
        }
    }
}

impl ServerConfig {
    /// Loads the config file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// The pool half of the configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            thread_count: if self.thread_count == 0 {
                mcpd_runtime::pool::optimal_thread_count()
            } else {
                self.thread_count
            },
            queue_capacity: self.queue_capacity,
            min_thread_count: 1,
            arena_block_size: 0,
        }
    }

    /// The transport half of the configuration.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            bind_host: self.bind_host.clone(),
            bind_port: self.bind_port,
            max_clients: self.max_clients,
            max_message_size: self.max_message_size,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            buffer_size: self.buffer_pool_size,
            buffer_count: self.buffer_count,
            ..TransportConfig::default()
        }
    }

    /// The rate limiter configuration, when enabled.
    #[must_use]
    pub fn rate_limiter_config(&self) -> Option<RateLimiterConfig> {
        if !self.rate_limit.enabled {
            return None;
        }
        Some(RateLimiterConfig {
            capacity: self.rate_limit.capacity,
            window: Duration::from_millis(self.rate_limit.window_ms),
            quota: self.rate_limit.quota,
            ..RateLimiterConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_host, "127.0.0.1");
        assert_eq!(config.max_clients, 64);
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bind_port":7000,"rate_limit":{{"enabled":true,"quota":5}}}}"#
        )
        .unwrap();
        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_port, 7000);
        assert_eq!(config.rate_limit.quota, 5);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert!(config.rate_limiter_config().is_some());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bind_prot":7000}}"#).unwrap();
        assert!(ServerConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn zero_thread_count_selects_cpu_count() {
        let config = ServerConfig::default();
        assert!(config.pool_config().thread_count >= 1);
    }
}
