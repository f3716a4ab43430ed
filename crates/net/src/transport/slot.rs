//! Client bookkeeping slots.
//!
//! Slots move `Inactive → Active` when the accept thread places a connection,
//! `Active → Closing` when the handler starts tearing the connection down
//! (idle reap, peer close, error, or transport stop), and `Closing →
//! Inactive` once the handler has released the socket. Only the accept thread
//! allocates; only the owning handler releases; the reaper just reads
//! timestamps, sets `should_stop`, and shuts the socket down.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::socket::shutdown_socket;

const INACTIVE: u8 = 0;
const ACTIVE: u8 = 1;
const CLOSING: u8 = 2;

/// One entry of the fixed-size client table.
pub(crate) struct ClientSlot {
    index: usize,
    state: AtomicU8,
    socket: Mutex<Option<TcpStream>>,
    peer: Mutex<Option<SocketAddr>>,
    last_activity_ms: AtomicU64,
    should_stop: AtomicBool,
}

impl ClientSlot {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: AtomicU8::new(INACTIVE),
            socket: Mutex::new(None),
            peer: Mutex::new(None),
            last_activity_ms: AtomicU64::new(0),
            should_stop: AtomicBool::new(false),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    /// Claims an inactive slot. The per-slot CAS makes the claim safe even
    /// though only the accept thread allocates today.
    fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(INACTIVE, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Installs the freshly accepted connection into a claimed slot.
    fn install(&self, stream: TcpStream, peer: SocketAddr, now_ms: u64) {
        *self.socket.lock() = Some(stream);
        *self.peer.lock() = Some(peer);
        self.last_activity_ms.store(now_ms, Ordering::Release);
        self.should_stop.store(false, Ordering::Release);
    }

    /// Clones the slot's socket handle for the handler task.
    pub(crate) fn stream(&self) -> Option<TcpStream> {
        self.socket.lock().as_ref().and_then(|s| s.try_clone().ok())
    }

    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    /// Records read completion time (monotonic ms).
    pub(crate) fn touch(&self, now_ms: u64) {
        self.last_activity_ms.store(now_ms, Ordering::Release);
    }

    pub(crate) fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Acquire)
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    /// Asks the handler to wind down and unblocks its pending read. Called
    /// by the reaper (idle timeout) and by transport stop.
    pub(crate) fn request_stop(&self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(stream) = &*self.socket.lock() {
            shutdown_socket(stream);
        }
    }

    /// Releases the slot back to `Inactive` (owning handler only).
    pub(crate) fn release(&self) {
        self.state.store(CLOSING, Ordering::Release);
        if let Some(stream) = self.socket.lock().take() {
            shutdown_socket(&stream);
        }
        *self.peer.lock() = None;
        self.should_stop.store(false, Ordering::Release);
        self.state.store(INACTIVE, Ordering::Release);
    }
}

/// Fixed-size slot table.
pub(crate) struct SlotTable {
    slots: Box<[ClientSlot]>,
}

impl SlotTable {
    pub(crate) fn new(max_clients: usize) -> Self {
        Self {
            slots: (0..max_clients).map(ClientSlot::new).collect(),
        }
    }

    /// Linear scan for a free slot; `None` means the table is full and the
    /// caller sheds the connection.
    pub(crate) fn allocate(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        now_ms: u64,
    ) -> Option<&ClientSlot> {
        for slot in &self.slots {
            if slot.try_claim() {
                slot.install(stream, peer, now_ms);
                return Some(slot);
            }
        }
        None
    }

    pub(crate) fn get(&self, index: usize) -> &ClientSlot {
        &self.slots[index]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ClientSlot> {
        self.slots.iter()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    #[test]
    fn slots_cycle_through_states() {
        let table = SlotTable::new(2);
        let (_client, server, peer) = socket_pair();

        let slot = table.allocate(server, peer, 100).unwrap();
        assert!(slot.is_active());
        assert_eq!(slot.last_activity_ms(), 100);
        assert_eq!(slot.peer(), Some(peer));
        assert_eq!(table.active_count(), 1);

        slot.touch(250);
        assert_eq!(slot.last_activity_ms(), 250);

        slot.release();
        assert!(!slot.is_active());
        assert_eq!(table.active_count(), 0);
        assert_eq!(slot.peer(), None);
    }

    #[test]
    fn full_table_sheds_connections() {
        let table = SlotTable::new(1);
        let (_c1, s1, p1) = socket_pair();
        let (_c2, s2, p2) = socket_pair();

        let first = table.allocate(s1, p1, 0).unwrap();
        assert!(table.allocate(s2, p2, 0).is_none());

        first.release();
        let (_c3, s3, p3) = socket_pair();
        assert!(table.allocate(s3, p3, 0).is_some());
    }

    #[test]
    fn request_stop_is_sticky_until_release() {
        let table = SlotTable::new(1);
        let (_client, server, peer) = socket_pair();
        let slot = table.allocate(server, peer, 0).unwrap();

        assert!(!slot.should_stop());
        slot.request_stop();
        assert!(slot.should_stop());

        slot.release();
        assert!(!slot.should_stop());
    }
}
