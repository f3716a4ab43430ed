//! Assembly of the running server: thread pool, dispatcher, transport.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use mcpd_net::{RateLimiter, ServerTransport};
use mcpd_runtime::ThreadPool;
use tracing::info;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;

/// A fully wired server instance.
pub struct Server {
    transport: ServerTransport,
}

impl Server {
    /// Builds pool, dispatcher and transport from `config` and starts
    /// listening.
    pub fn start(config: &ServerConfig) -> anyhow::Result<Self> {
        let mut dispatcher = Dispatcher::with_builtins();
        if let Some(limiter_config) = config.rate_limiter_config() {
            let limiter = RateLimiter::new(limiter_config).context("building rate limiter")?;
            dispatcher = dispatcher.with_rate_limiter(limiter);
        }
        Self::start_with_dispatcher(config, dispatcher)
    }

    /// Same as [`start`](Self::start) with a caller-supplied dispatch table.
    pub fn start_with_dispatcher(
        config: &ServerConfig,
        dispatcher: Dispatcher,
    ) -> anyhow::Result<Self> {
        let pool = Arc::new(ThreadPool::new(config.pool_config()).context("starting thread pool")?);
        let transport = ServerTransport::new(
            config.transport_config(),
            pool,
            Arc::new(dispatcher),
        )
        .context("building transport")?;
        transport.start().context("starting transport")?;
        info!(
            addr = ?transport.local_addr(),
            "mcpd listening"
        );
        Ok(Self { transport })
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Connection/message counters from the transport.
    #[must_use]
    pub fn stats(&self) -> mcpd_net::TransportStats {
        self.transport.stats()
    }

    /// Orderly shutdown; `Ok(false)` when already stopped.
    pub fn stop(&self) -> anyhow::Result<bool> {
        Ok(self.transport.stop()?)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
