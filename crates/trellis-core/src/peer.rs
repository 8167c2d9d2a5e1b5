//! Opaque peer handles.
//!
//! Peers are created and destroyed by the device's peer-management layer; the
//! receive pipeline only ever borrows them through reference-counted handles
//! handed out by the handshake and decryption subsystems. Dropping the handle
//! is the release; every acquisition must be balanced by exactly one drop on
//! every exit path, which `Arc` enforces structurally.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reference-counted handle to a tunnel peer.
pub type PeerHandle = Arc<Peer>;

/// A tunnel endpoint, as seen by the receive pipeline.
#[derive(Debug)]
pub struct Peer {
    id: u64,
    rx_bytes: AtomicU64,
    rx_packets: AtomicU64,
    endpoint: Mutex<Option<SocketAddr>>,
    staged: Mutex<VecDeque<Bytes>>,
}

impl Peer {
    pub fn new(id: u64) -> PeerHandle {
        Arc::new(Self {
            id,
            rx_bytes: AtomicU64::new(0),
            rx_packets: AtomicU64::new(0),
            endpoint: Mutex::new(None),
            staged: Mutex::new(VecDeque::new()),
        })
    }

    /// Stable identifier, used for log correlation and identity comparison.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Account one received, authenticated message of `len` bytes.
    pub fn record_rx(&self, len: usize) {
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    pub fn rx_packets(&self) -> u64 {
        self.rx_packets.load(Ordering::Relaxed)
    }

    /// Refresh the last known network address for this peer.
    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self.endpoint.lock() = Some(addr);
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock()
    }

    /// Stage an outbound packet to be sent once a live session exists.
    pub fn stage_packet(&self, packet: Bytes) {
        self.staged.lock().push_back(packet);
    }

    /// Drain the packets staged while no session was available. Called by the
    /// send path when a session is established or a new key activates.
    pub fn take_staged(&self) -> Vec<Bytes> {
        self.staged.lock().drain(..).collect()
    }
}
