//! Cross-platform socket primitives.
//!
//! A [`Listener`] wraps the listening socket together with its interrupt
//! mechanism: on POSIX a self-pipe makes the `poll(2)` in front of `accept`
//! wake immediately, and the listening socket is additionally shut down; on
//! Windows shutting the listener down is sufficient to unblock a pending
//! accept. [`recv_exact`] and [`send_exact`] implement the exact-length I/O
//! the framing layer builds on.

// The self-pipe and poll(2) interrupt path goes through libc.
#![allow(unsafe_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{NetError, NetResult};

/// Outcome of an interruptible accept.
#[derive(Debug)]
pub enum Accepted {
    /// A peer connected.
    Connection(TcpStream, SocketAddr),
    /// [`Listener::interrupt`] was called; the accept loop should exit.
    Interrupted,
}

/// A listening socket with a thread-safe interrupt.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    stopped: AtomicBool,
    #[cfg(unix)]
    stop_pipe: StopPipe,
}

impl Listener {
    /// Creates, configures (`SO_REUSEADDR`), binds and listens.
    pub fn bind(host: &str, port: u16, backlog: u32) -> NetResult<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| NetError::ResolveFailed {
                host: host.to_string(),
            })?
            .next()
            .ok_or_else(|| NetError::ResolveFailed {
                host: host.to_string(),
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| NetError::socket("create", &e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| NetError::socket("setsockopt", &e))?;
        socket.bind(&addr.into()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                NetError::AddressInUse {
                    addr: addr.to_string(),
                }
            } else {
                NetError::socket("bind", &e)
            }
        })?;
        socket
            .listen(backlog as i32)
            .map_err(|e| NetError::socket("listen", &e))?;

        let inner: TcpListener = socket.into();
        let local_addr = inner
            .local_addr()
            .map_err(|e| NetError::socket("getsockname", &e))?;

        #[cfg(unix)]
        {
            // The poll in `accept` needs a non-blocking listener so a raced
            // (aborted) connection cannot re-block the thread.
            inner
                .set_nonblocking(true)
                .map_err(|e| NetError::socket("nonblocking", &e))?;
        }

        debug!(%local_addr, backlog, "listener bound");
        Ok(Self {
            inner,
            local_addr,
            stopped: AtomicBool::new(false),
            #[cfg(unix)]
            stop_pipe: StopPipe::new()?,
        })
    }

    /// The bound address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wakes a blocked [`accept`](Self::accept) from another thread.
    pub fn interrupt(&self) {
        self.stopped.store(true, Ordering::Release);
        #[cfg(unix)]
        self.stop_pipe.trigger();
        // Shutting the listening socket down unblocks accept on every
        // platform; on Windows it is the only mechanism.
        let _ = socket2::SockRef::from(&self.inner).shutdown(Shutdown::Both);
    }

    /// Blocks until a peer connects or [`interrupt`](Self::interrupt) fires.
    #[cfg(unix)]
    pub fn accept(&self) -> NetResult<Accepted> {
        use std::os::fd::AsRawFd;

        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(Accepted::Interrupted);
            }

            let mut fds = [
                libc::pollfd {
                    fd: self.inner.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.stop_pipe.read_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: `fds` is a valid array of initialized pollfd structs
            // for the duration of the call.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(NetError::socket("poll", &err));
            }
            if fds[1].revents != 0 || self.stopped.load(Ordering::Acquire) {
                return Ok(Accepted::Interrupted);
            }
            if fds[0].revents == 0 {
                continue;
            }

            match self.inner.accept() {
                Ok((stream, peer)) => {
                    // Accepted sockets must block: handlers use plain
                    // exact-length reads.
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| NetError::socket("nonblocking", &e))?;
                    return Ok(Accepted::Connection(stream, peer));
                }
                // The pending connection was aborted between poll and accept.
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.stopped.load(Ordering::Acquire) {
                        return Ok(Accepted::Interrupted);
                    }
                    return Err(NetError::socket("accept", &e));
                }
            }
        }
    }

    /// Blocks until a peer connects or [`interrupt`](Self::interrupt) fires.
    #[cfg(windows)]
    pub fn accept(&self) -> NetResult<Accepted> {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(Accepted::Interrupted);
            }
            match self.inner.accept() {
                Ok((stream, peer)) => return Ok(Accepted::Connection(stream, peer)),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Closing/shutting down the listener surfaces here.
                    if self.stopped.load(Ordering::Acquire) {
                        return Ok(Accepted::Interrupted);
                    }
                    return Err(NetError::socket("accept", &e));
                }
            }
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

/// Self-pipe used to interrupt `poll` on POSIX.
#[cfg(unix)]
struct StopPipe {
    read_fd: std::os::fd::OwnedFd,
    write_fd: std::os::fd::OwnedFd,
}

#[cfg(unix)]
impl StopPipe {
    fn new() -> NetResult<Self> {
        use std::os::fd::FromRawFd;

        let mut fds = [0_i32; 2];
        // SAFETY: `fds` is a valid out-array for pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(NetError::socket("pipe", &std::io::Error::last_os_error()));
        }
        // SAFETY: pipe(2) returned two fresh, owned descriptors.
        unsafe {
            Ok(Self {
                read_fd: std::os::fd::OwnedFd::from_raw_fd(fds[0]),
                write_fd: std::os::fd::OwnedFd::from_raw_fd(fds[1]),
            })
        }
    }

    fn read_fd(&self) -> i32 {
        use std::os::fd::AsRawFd;
        self.read_fd.as_raw_fd()
    }

    fn trigger(&self) {
        use std::os::fd::AsRawFd;
        let byte = [1_u8];
        // SAFETY: writing one byte from a valid buffer to an owned fd.
        let _ = unsafe { libc::write(self.write_fd.as_raw_fd(), byte.as_ptr().cast(), 1) };
    }
}

/// Reads exactly `buf.len()` bytes.
///
/// A clean close before the first byte, or any close mid-buffer, is
/// [`NetError::ConnectionClosed`].
pub fn recv_exact(stream: &mut TcpStream, buf: &mut [u8]) -> NetResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(NetError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(NetError::socket("recv", &e)),
        }
    }
    Ok(())
}

/// Writes exactly `buf.len()` bytes.
pub fn send_exact(stream: &mut TcpStream, buf: &[u8]) -> NetResult<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match stream.write(&buf[sent..]) {
            Ok(0) => {
                return Err(NetError::Socket {
                    op: "send",
                    reason: "wrote zero bytes".to_string(),
                });
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(NetError::socket("send", &e)),
        }
    }
    Ok(())
}

/// Half-closes both directions. Used to interrupt a blocking read on the
/// same socket from another thread (reaper, shutdown).
pub fn shutdown_socket(stream: &TcpStream) {
    let _ = stream.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bind_accept_and_exact_io() {
        let listener = Listener::bind("127.0.0.1", 0, 16).unwrap();
        let addr = listener.local_addr();

        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            send_exact(&mut stream, b"hello exact").unwrap();
            let mut reply = [0_u8; 2];
            recv_exact(&mut stream, &mut reply).unwrap();
            reply
        });

        let Accepted::Connection(mut stream, _) = listener.accept().unwrap() else {
            panic!("expected a connection");
        };
        let mut buf = [0_u8; 11];
        recv_exact(&mut stream, &mut buf).unwrap();
        assert_eq!(&buf, b"hello exact");
        send_exact(&mut stream, b"ok").unwrap();

        assert_eq!(client.join().unwrap(), *b"ok");
    }

    #[test]
    fn interrupt_unblocks_accept() {
        let listener = std::sync::Arc::new(Listener::bind("127.0.0.1", 0, 16).unwrap());
        let waker = std::sync::Arc::clone(&listener);

        let acceptor = std::thread::spawn(move || listener.accept());
        std::thread::sleep(Duration::from_millis(100));
        waker.interrupt();

        let accepted = acceptor.join().unwrap().unwrap();
        assert!(matches!(accepted, Accepted::Interrupted));
    }

    #[test]
    fn partial_frame_reports_connection_closed() {
        let listener = Listener::bind("127.0.0.1", 0, 16).unwrap();
        let addr = listener.local_addr();

        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            // Send half of what the server expects, then close.
            send_exact(&mut stream, b"abc").unwrap();
        });

        let Accepted::Connection(mut stream, _) = listener.accept().unwrap() else {
            panic!("expected a connection");
        };
        let mut buf = [0_u8; 8];
        let err = recv_exact(&mut stream, &mut buf).unwrap_err();
        assert_eq!(err, NetError::ConnectionClosed);
        client.join().unwrap();
    }

    #[test]
    fn shutdown_interrupts_a_blocked_read() {
        let listener = Listener::bind("127.0.0.1", 0, 16).unwrap();
        let addr = listener.local_addr();

        let _client = TcpStream::connect(addr).unwrap();
        let Accepted::Connection(stream, _) = listener.accept().unwrap() else {
            panic!("expected a connection");
        };

        let mut reader_side = stream.try_clone().unwrap();
        let reader = std::thread::spawn(move || {
            let mut buf = [0_u8; 4];
            recv_exact(&mut reader_side, &mut buf)
        });

        std::thread::sleep(Duration::from_millis(100));
        shutdown_socket(&stream);
        let result = reader.join().unwrap();
        assert!(result.is_err(), "read should not still be blocked");
    }

    #[test]
    fn second_bind_to_same_port_fails() {
        let first = Listener::bind("127.0.0.1", 0, 16).unwrap();
        let port = first.local_addr().port();
        let err = Listener::bind("127.0.0.1", port, 16).unwrap_err();
        // SO_REUSEADDR does not permit two live listeners on one port.
        assert!(matches!(
            err,
            NetError::AddressInUse { .. } | NetError::Socket { .. }
        ));
    }
}
