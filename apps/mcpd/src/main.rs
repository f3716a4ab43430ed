//! mcpd: Model Context Protocol server daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcpd::{Server, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "mcpd", version, about = "Model Context Protocol server daemon")]
struct Cli {
    /// Path to a JSON config file (all keys optional).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the worker thread count (0 = logical CPUs).
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(&Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(host) = &cli.host {
        config.bind_host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.bind_port = port;
    }
    if let Some(threads) = cli.threads {
        config.thread_count = threads;
    }

    let server = Server::start(&config)?;

    signals::install();
    while !signals::shutdown_requested() {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("shutdown signal received");

    server.stop()?;
    Ok(())
}

#[cfg(unix)]
mod signals {
    //! SIGINT/SIGTERM turn into a flag the main loop polls; the handler body
    //! is a single async-signal-safe atomic store.

    #![allow(unsafe_code)]

    use std::sync::atomic::{AtomicBool, Ordering};

    static SHUTDOWN: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_signal(_signal: libc::c_int) {
        SHUTDOWN.store(true, Ordering::Release);
    }

    pub(crate) fn install() {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: installing a handler whose body is one atomic store.
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    }

    pub(crate) fn shutdown_requested() -> bool {
        SHUTDOWN.load(Ordering::Acquire)
    }
}

#[cfg(not(unix))]
mod signals {
    //! Without POSIX signals the daemon runs until the process is killed.

    pub(crate) fn install() {}

    pub(crate) fn shutdown_requested() -> bool {
        false
    }
}
