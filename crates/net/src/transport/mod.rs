//! TCP server transport.
//!
//! One accept thread owns the listening socket and places connections into a
//! fixed slot table; each connection is serviced by a handler task submitted
//! to the work-stealing pool, which reads length-prefixed frames, resets its
//! worker's arena, invokes the message callback, and writes the framed
//! response on the same socket. A reaper thread closes idle connections and
//! a monitor thread periodically offers the pool a smart adjust.
//!
//! Lifecycle: `Stopped → Starting → Running → Stopping → Stopped`. Starting
//! a running transport warns and succeeds; stopping a stopped transport is a
//! no-op that reports "already stopped".

pub mod config;
mod slot;

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mcpd_memory::{BufferPool, PooledBuffer, current};
use mcpd_runtime::{LoadProbe, RuntimeError, SystemProbe, ThreadPool};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};
use crate::framing::{HEADER_SIZE, decode_length, write_frame};
use crate::socket::{Accepted, Listener, recv_exact};
use crate::transport::config::TransportConfig;
use crate::transport::slot::SlotTable;

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

/// How long [`ServerTransport::stop`] waits for in-flight handlers before
/// shutting the pool down.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Step size for interruptible sleeps in the reaper and monitor threads.
const SLEEP_STEP: Duration = Duration::from_millis(25);

/// What the message callback wants done with the connection.
#[derive(Debug)]
pub struct MessageOutcome {
    /// Response payload, framed and written by the transport. The transport
    /// owns (and drops) the buffer; the value-type equivalent of the
    /// free-function contract in the C lineage.
    pub response: Option<Vec<u8>>,
    /// `false` closes the connection after any response is written.
    pub keep_open: bool,
}

impl MessageOutcome {
    /// Respond and keep the connection open.
    #[must_use]
    pub fn respond(response: Vec<u8>) -> Self {
        Self {
            response: Some(response),
            keep_open: true,
        }
    }

    /// No response (e.g. a notification); keep the connection open.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            response: None,
            keep_open: true,
        }
    }

    /// Respond, then close.
    #[must_use]
    pub fn respond_and_close(response: Vec<u8>) -> Self {
        Self {
            response: Some(response),
            keep_open: false,
        }
    }

    /// Close without responding.
    #[must_use]
    pub fn close() -> Self {
        Self {
            response: None,
            keep_open: false,
        }
    }
}

/// Identity of the connection a message arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub slot_index: usize,
    pub peer: SocketAddr,
}

/// The transport's upward interface.
pub trait TransportHandler: Send + Sync + 'static {
    /// Called once per received frame, on a pool worker whose arena has just
    /// been reset. Returning an error drops the connection.
    fn on_message(&self, conn: &ConnectionInfo, payload: &[u8]) -> NetResult<MessageOutcome>;

    /// Transport-level problems surfaced upward (accept failures, oversized
    /// frames, connection errors).
    fn on_error(&self, _error: &NetError) {}
}

/// Counters published by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub connections_total: u64,
    pub active_connections: usize,
    pub messages_received: u64,
    pub messages_sent: u64,
}

struct Shared {
    config: TransportConfig,
    state: AtomicU8,
    listener: Mutex<Option<Arc<Listener>>>,
    slots: SlotTable,
    buffers: Arc<BufferPool>,
    pool: Arc<ThreadPool>,
    handler: Arc<dyn TransportHandler>,
    epoch: Instant,
    cleanup_running: AtomicBool,
    connections_total: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
}

#[derive(Default)]
struct Threads {
    accept: Option<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

/// The TCP server transport. See the module docs for the thread model.
pub struct ServerTransport {
    shared: Arc<Shared>,
    threads: Mutex<Threads>,
}

impl ServerTransport {
    /// Builds a stopped transport.
    pub fn new(
        config: TransportConfig,
        pool: Arc<ThreadPool>,
        handler: Arc<dyn TransportHandler>,
    ) -> NetResult<Self> {
        config.validate()?;
        let buffers = BufferPool::new(config.buffer_size, config.buffer_count)
            .map_err(|e| NetError::invalid_config(e.to_string()))?;
        Ok(Self {
            shared: Arc::new(Shared {
                slots: SlotTable::new(config.max_clients),
                config,
                state: AtomicU8::new(STOPPED),
                listener: Mutex::new(None),
                buffers,
                pool,
                handler,
                epoch: Instant::now(),
                cleanup_running: AtomicBool::new(false),
                connections_total: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
                messages_sent: AtomicU64::new(0),
            }),
            threads: Mutex::new(Threads::default()),
        })
    }

    /// Binds the listener and spawns the accept, reaper and monitor threads.
    ///
    /// Calling start on a running transport warns and returns `Ok`.
    pub fn start(&self) -> NetResult<()> {
        match self.shared.state.compare_exchange(
            STOPPED,
            STARTING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(RUNNING) => {
                warn!("transport start requested but it is already running");
                return Ok(());
            }
            Err(_) => {
                return Err(NetError::invalid_state(
                    "transport is mid start or stop",
                ));
            }
        }

        let listener = match Listener::bind(
            &self.shared.config.bind_host,
            self.shared.config.bind_port,
            self.shared.config.backlog,
        ) {
            Ok(listener) => Arc::new(listener),
            Err(err) => {
                self.shared.state.store(STOPPED, Ordering::Release);
                return Err(err);
            }
        };
        *self.shared.listener.lock() = Some(Arc::clone(&listener));
        self.shared.cleanup_running.store(true, Ordering::Release);

        let spawn_result = (|| -> NetResult<Threads> {
            let accept = {
                let shared = Arc::clone(&self.shared);
                let listener = Arc::clone(&listener);
                spawn_named("mcpd-accept", move || accept_loop(&shared, &listener))?
            };
            let reaper = {
                let shared = Arc::clone(&self.shared);
                spawn_named("mcpd-reaper", move || reaper_loop(&shared))?
            };
            let monitor = {
                let shared = Arc::clone(&self.shared);
                spawn_named("mcpd-monitor", move || monitor_loop(&shared))?
            };
            Ok(Threads {
                accept: Some(accept),
                reaper: Some(reaper),
                monitor: Some(monitor),
            })
        })();

        match spawn_result {
            Ok(threads) => {
                *self.threads.lock() = threads;
                self.shared.state.store(RUNNING, Ordering::Release);
                info!(addr = %listener.local_addr(), "transport started");
                Ok(())
            }
            Err(err) => {
                // Roll back whatever started.
                self.shared.cleanup_running.store(false, Ordering::Release);
                listener.interrupt();
                *self.shared.listener.lock() = None;
                self.shared.state.store(STOPPED, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Stops the transport: interrupt accept, join the service threads, stop
    /// every live connection, drain and shut down the pool.
    ///
    /// Returns `Ok(false)` ("already stopped") when the transport was not
    /// running.
    pub fn stop(&self) -> NetResult<bool> {
        match self.shared.state.compare_exchange(
            RUNNING,
            STOPPING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STOPPED) => {
                debug!("transport stop requested but it is already stopped");
                return Ok(false);
            }
            Err(_) => {
                return Err(NetError::invalid_state(
                    "transport is mid start or stop",
                ));
            }
        }
        info!("transport stopping");

        // Interrupt accept: stop pipe plus listener shutdown.
        if let Some(listener) = &*self.shared.listener.lock() {
            listener.interrupt();
        }

        {
            let mut threads = self.threads.lock();
            if let Some(handle) = threads.accept.take() {
                let _ = handle.join();
            }
            self.shared.cleanup_running.store(false, Ordering::Release);
            if let Some(handle) = threads.reaper.take() {
                let _ = handle.join();
            }
            if let Some(handle) = threads.monitor.take() {
                let _ = handle.join();
            }
        }

        // Kick every live connection; handlers observe the socket error (or
        // the flag) and release their slots.
        for slot in self.shared.slots.iter() {
            if slot.is_active() {
                slot.request_stop();
            }
        }

        self.shared.pool.wait(Some(STOP_DRAIN_TIMEOUT));
        match self.shared.pool.shutdown() {
            Ok(()) | Err(RuntimeError::AlreadyStopped) => {}
            Err(err) => warn!(error = %err, "pool shutdown reported an error"),
        }

        *self.shared.listener.lock() = None;
        let stats = self.stats();
        info!(
            connections = stats.connections_total,
            received = stats.messages_received,
            sent = stats.messages_sent,
            "transport stopped"
        );
        self.shared.state.store(STOPPED, Ordering::Release);
        Ok(true)
    }

    /// The bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.listener.lock().as_ref().map(|l| l.local_addr())
    }

    /// True while the transport accepts connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == RUNNING
    }

    /// Connection and message counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            connections_total: self.shared.connections_total.load(Ordering::Relaxed),
            active_connections: self.shared.slots.active_count(),
            messages_received: self.shared.messages_received.load(Ordering::Relaxed),
            messages_sent: self.shared.messages_sent.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTransport")
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

fn spawn_named(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> NetResult<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| NetError::Socket {
            op: "spawn",
            reason: e.to_string(),
        })
}

fn accept_loop(shared: &Arc<Shared>, listener: &Listener) {
    loop {
        match listener.accept() {
            Ok(Accepted::Interrupted) => break,
            Ok(Accepted::Connection(stream, peer)) => place_connection(shared, stream, peer),
            Err(err) => {
                let state = shared.state.load(Ordering::Acquire);
                if state == STOPPING || state == STOPPED {
                    break;
                }
                warn!(error = %err, "accept failed; server continues");
                shared.handler.on_error(&err);
                // Avoid a hot loop on persistent errors (e.g. fd exhaustion).
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    debug!("accept thread exiting");
}

fn place_connection(shared: &Arc<Shared>, stream: std::net::TcpStream, peer: SocketAddr) {
    let now = shared.now_ms();
    let Some(slot) = shared.slots.allocate(stream, peer, now) else {
        // Load shedding: the new socket is dropped (closed) immediately.
        warn!(%peer, max_clients = shared.slots.len(), "client table full; shedding connection");
        return;
    };
    let index = slot.index();
    shared.connections_total.fetch_add(1, Ordering::Relaxed);

    let task_shared = Arc::clone(shared);
    if let Err(err) = shared.pool.submit(move || run_client(&task_shared, index)) {
        warn!(%peer, error = %err, "failed to schedule client handler");
        shared.slots.get(index).release();
    } else {
        debug!(%peer, slot = index, "connection accepted");
    }
}

/// Services one connection for its lifetime: the framed read → arena reset →
/// callback → framed write loop.
fn run_client(shared: &Shared, index: usize) {
    let slot = shared.slots.get(index);
    let (Some(mut stream), Some(peer)) = (slot.stream(), slot.peer()) else {
        slot.release();
        return;
    };
    let info = ConnectionInfo {
        slot_index: index,
        peer,
    };

    let failure: Option<NetError> = loop {
        if slot.should_stop() {
            break None;
        }

        let mut header = [0_u8; HEADER_SIZE];
        match recv_exact(&mut stream, &mut header) {
            Ok(()) => {}
            // Peer closed between frames: a clean end of the connection.
            Err(NetError::ConnectionClosed) => break None,
            Err(_) if slot.should_stop() => break None,
            Err(err) => break Some(err),
        }

        let length = decode_length(header);
        if length > shared.config.max_message_size {
            let err = NetError::FrameTooLarge {
                length,
                max: shared.config.max_message_size,
            };
            warn!(slot = index, length, "oversized frame; dropping connection");
            shared.handler.on_error(&err);
            break None;
        }

        let mut storage = shared.acquire_buffer(length);
        match recv_exact(&mut stream, &mut storage[..length]) {
            Ok(()) => {}
            Err(_) if slot.should_stop() => break None,
            Err(NetError::ConnectionClosed) => break Some(NetError::ConnectionClosed),
            Err(err) => break Some(err),
        }

        slot.touch(shared.now_ms());

        // Fresh arena for this request; the callback parses into it.
        current::try_reset();
        let outcome = match shared.handler.on_message(&info, &storage[..length]) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(slot = index, error = %err, "message callback failed; dropping connection");
                shared.handler.on_error(&err);
                break None;
            }
        };
        shared.messages_received.fetch_add(1, Ordering::Relaxed);

        if let Some(response) = outcome.response {
            if let Err(err) = write_frame(&mut stream, &response) {
                break Some(err);
            }
            shared.messages_sent.fetch_add(1, Ordering::Relaxed);
        }
        if !outcome.keep_open {
            break None;
        }
        // `storage` drops here, returning the pooled buffer.
    };

    if let Some(err) = failure {
        debug!(slot = index, error = %err, "connection error");
        shared.handler.on_error(&err);
    }
    slot.release();
    debug!(slot = index, "connection released");
}

fn reaper_loop(shared: &Shared) {
    let timeout_ms = shared.config.idle_timeout.as_millis() as u64;
    while shared.cleanup_running.load(Ordering::Acquire) {
        if !sleep_interruptible(&shared.cleanup_running, shared.config.cleanup_interval) {
            break;
        }
        let now = shared.now_ms();
        for slot in shared.slots.iter() {
            if slot.is_active() && now.saturating_sub(slot.last_activity_ms()) > timeout_ms {
                debug!(slot = slot.index(), "idle connection reaped");
                slot.request_stop();
            }
        }
    }
    debug!("reaper thread exiting");
}

fn monitor_loop(shared: &Shared) {
    let mut probe = SystemProbe::new();
    while shared.cleanup_running.load(Ordering::Acquire) {
        if !sleep_interruptible(&shared.cleanup_running, shared.config.monitor_interval) {
            break;
        }
        let sample = probe.sample();
        let adjustment = shared.pool.smart_adjust(&sample);
        if adjustment != mcpd_runtime::Adjustment::None {
            info!(?adjustment, "monitor adjusted pool size");
        }
    }
    debug!("monitor thread exiting");
}

/// Sleeps up to `total`, returning early (false) when `running` clears.
fn sleep_interruptible(running: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        std::thread::sleep(SLEEP_STEP.min(deadline.saturating_duration_since(Instant::now())));
    }
    running.load(Ordering::Acquire)
}

/// Frame storage: pooled when the frame fits, ad-hoc heap otherwise.
enum IoBuffer {
    Pooled(PooledBuffer),
    Heap(Vec<u8>),
}

impl Deref for IoBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Pooled(buf) => buf,
            Self::Heap(buf) => buf,
        }
    }
}

impl DerefMut for IoBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Pooled(buf) => buf,
            Self::Heap(buf) => buf,
        }
    }
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn acquire_buffer(&self, length: usize) -> IoBuffer {
        if length <= self.buffers.buffer_size() {
            match self.buffers.acquire() {
                Ok(buf) => return IoBuffer::Pooled(buf),
                Err(_) => {
                    debug!(length, "buffer pool exhausted; heap fallback (pool miss)");
                }
            }
        } else {
            debug!(
                length,
                pooled = self.buffers.buffer_size(),
                "frame exceeds pooled buffer size; heap fallback (pool miss)"
            );
        }
        IoBuffer::Heap(vec![0_u8; length])
    }
}
