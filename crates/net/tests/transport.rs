//! End-to-end transport behavior over real localhost sockets.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcpd_net::{
    ConnectionInfo, MessageOutcome, NetResult, ServerTransport, TransportConfig, TransportHandler,
};
use mcpd_runtime::{PoolConfig, ThreadPool};

/// Echoes every payload back on the same connection.
struct EchoHandler;

impl TransportHandler for EchoHandler {
    fn on_message(&self, _conn: &ConnectionInfo, payload: &[u8]) -> NetResult<MessageOutcome> {
        Ok(MessageOutcome::respond(payload.to_vec()))
    }
}

/// Replies once, then asks the transport to close the connection.
struct OneShotHandler;

impl TransportHandler for OneShotHandler {
    fn on_message(&self, _conn: &ConnectionInfo, payload: &[u8]) -> NetResult<MessageOutcome> {
        Ok(MessageOutcome::respond_and_close(payload.to_vec()))
    }
}

fn start_transport(
    threads: usize,
    handler: Arc<dyn TransportHandler>,
    tweak: impl FnOnce(&mut TransportConfig),
) -> (ServerTransport, SocketAddr) {
    let pool = Arc::new(
        ThreadPool::new(PoolConfig {
            thread_count: threads,
            queue_capacity: 64,
            min_thread_count: 1,
            arena_block_size: 0,
        })
        .expect("pool"),
    );
    let mut config = TransportConfig::default();
    tweak(&mut config);
    let transport = ServerTransport::new(config, pool, handler).expect("transport");
    transport.start().expect("start");
    let addr = transport.local_addr().expect("bound address");
    (transport, addr)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).expect("send frame");
}

/// Reads one frame; `None` on clean EOF.
fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0_u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match stream.read(&mut header[filled..]) {
            Ok(0) => return None,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return None,
        }
    }
    let length = u32::from_be_bytes(header) as usize;
    let mut payload = vec![0_u8; length];
    let mut filled = 0;
    while filled < length {
        match stream.read(&mut payload[filled..]) {
            Ok(0) => return None,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return None,
        }
    }
    Some(payload)
}

fn wait_until(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn echo_round_trip() {
    let (transport, addr) = start_transport(2, Arc::new(EchoHandler), |_| {});
    let mut stream = connect(addr);

    for i in 0..3 {
        let payload = format!("message {i}");
        send_frame(&mut stream, payload.as_bytes());
        let reply = read_frame(&mut stream).expect("echo reply");
        assert_eq!(reply, payload.as_bytes());
    }

    let stats = transport.stats();
    assert_eq!(stats.connections_total, 1);
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.messages_sent, 3);

    drop(stream);
    assert!(transport.stop().unwrap());
}

#[test]
fn responses_on_one_connection_never_interleave() {
    let (transport, addr) = start_transport(4, Arc::new(EchoHandler), |_| {});
    let mut stream = connect(addr);

    // Pipeline a burst of frames, then read all replies in order.
    let payloads: Vec<String> = (0..20).map(|i| format!("burst-{i:03}")).collect();
    for payload in &payloads {
        send_frame(&mut stream, payload.as_bytes());
    }
    for payload in &payloads {
        let reply = read_frame(&mut stream).expect("reply");
        assert_eq!(reply, payload.as_bytes());
    }

    assert!(transport.stop().unwrap());
}

#[test]
fn stop_twice_reports_already_stopped() {
    let (transport, _addr) = start_transport(2, Arc::new(EchoHandler), |_| {});
    assert!(transport.stop().unwrap());
    assert!(!transport.stop().unwrap());
}

#[test]
fn start_on_running_transport_is_ok() {
    let (transport, _addr) = start_transport(2, Arc::new(EchoHandler), |_| {});
    transport.start().expect("second start");
    assert!(transport.stop().unwrap());
}

#[test]
fn oversized_frame_drops_the_connection() {
    let (transport, addr) = start_transport(2, Arc::new(EchoHandler), |config| {
        config.max_message_size = 64;
    });
    let mut stream = connect(addr);

    // A frame of exactly the limit passes.
    send_frame(&mut stream, &[b'x'; 64]);
    assert!(read_frame(&mut stream).is_some());

    // One byte over closes the connection without a response.
    send_frame(&mut stream, &[b'x'; 65]);
    assert!(read_frame(&mut stream).is_none());

    assert!(transport.stop().unwrap());
}

#[test]
fn idle_connections_are_reaped() {
    let (transport, addr) = start_transport(2, Arc::new(EchoHandler), |config| {
        config.idle_timeout = Duration::from_millis(200);
        config.cleanup_interval = Duration::from_millis(50);
    });
    let mut stream = connect(addr);

    // Activity first, so the reap below is due to idling, not connect time.
    send_frame(&mut stream, b"warmup");
    assert!(read_frame(&mut stream).is_some());
    wait_until("connection active", Duration::from_secs(2), || {
        transport.stats().active_connections == 1
    });

    // Send nothing past the idle timeout: the reaper shuts the socket, the
    // handler exits, the slot returns to inactive.
    let reply = read_frame(&mut stream);
    assert!(reply.is_none(), "reaped connection should read EOF");
    wait_until("slot release", Duration::from_secs(2), || {
        transport.stats().active_connections == 0
    });

    assert!(transport.stop().unwrap());
}

#[test]
fn full_slot_table_sheds_new_connections() {
    let (transport, addr) = start_transport(2, Arc::new(EchoHandler), |config| {
        config.max_clients = 1;
    });

    let mut first = connect(addr);
    send_frame(&mut first, b"claim");
    assert!(read_frame(&mut first).is_some());

    // The second connection is closed immediately by load shedding.
    let mut second = connect(addr);
    assert!(read_frame(&mut second).is_none());

    // The first connection is unaffected.
    send_frame(&mut first, b"still here");
    assert_eq!(read_frame(&mut first).unwrap(), b"still here");

    assert!(transport.stop().unwrap());
}

#[test]
fn one_shot_handler_closes_after_response() {
    let (transport, addr) = start_transport(2, Arc::new(OneShotHandler), |_| {});
    let mut stream = connect(addr);

    send_frame(&mut stream, b"single");
    assert_eq!(read_frame(&mut stream).unwrap(), b"single");
    assert!(read_frame(&mut stream).is_none());

    assert!(transport.stop().unwrap());
}

#[test]
fn shutdown_under_load_closes_every_socket() {
    const CLIENTS: usize = 6;

    let (transport, addr) = start_transport(CLIENTS, Arc::new(EchoHandler), |config| {
        config.max_clients = CLIENTS;
    });

    let workers: Vec<_> = (0..CLIENTS)
        .map(|id| {
            std::thread::spawn(move || {
                let mut stream = connect(addr);
                let mut exchanged = 0_u64;
                loop {
                    let payload = format!("client {id} message {exchanged}");
                    let mut frame = Vec::with_capacity(4 + payload.len());
                    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                    frame.extend_from_slice(payload.as_bytes());
                    // Writes may fail once the server stops under us.
                    if stream.write_all(&frame).is_err() {
                        return exchanged;
                    }
                    match read_frame(&mut stream) {
                        Some(reply) => {
                            assert_eq!(reply, payload.as_bytes());
                            exchanged += 1;
                        }
                        // Server stopped: socket closed under us.
                        None => return exchanged,
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            })
        })
        .collect();

    // Let traffic flow, then stop under load.
    std::thread::sleep(Duration::from_millis(300));
    let stop_started = Instant::now();
    assert!(transport.stop().unwrap());

    let mut total = 0;
    for worker in workers {
        total += worker.join().expect("client thread");
    }
    assert!(
        stop_started.elapsed() < Duration::from_secs(5),
        "stop took too long"
    );
    assert!(total > 0, "clients should have exchanged some messages");

    let stats = transport.stats();
    assert_eq!(stats.active_connections, 0);
    // A handler may have counted a receive whose response write lost the
    // race with shutdown, so received bounds sent, and sent bounds what the
    // clients actually saw.
    assert!(stats.messages_received >= stats.messages_sent);
    assert!(stats.messages_sent >= total);
}
