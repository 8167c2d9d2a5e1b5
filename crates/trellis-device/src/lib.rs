//! Receive-side demultiplexing and admission pipeline for a trellis device.
//!
//! A device accepts raw inbound datagrams through [`Device::receive`],
//! classifies them, and routes them down one of two paths: handshake-class
//! messages are parked in a bounded backlog drained by a burst-limited
//! asynchronous worker, while transport datagrams are handed to the external
//! decrypt stage whose completion re-enters the pipeline through
//! [`Device::receive_decrypted`]. Everything expensive or stateful — Noise,
//! AEAD, routing, timers, sockets — sits behind the traits in [`externals`].

mod admission;
mod backlog;
pub mod externals;
mod handshake;
pub mod metrics;

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{envelope, message, CookieChecker, MessageKind};

use backlog::Backlog;
pub use backlog::QueueFull;
use externals::{Noise, Outbound, PacketSink, Routes, TimerSink, TransportDecrypt};
use metrics::DeviceMetrics;

/// Default backlog capacity for pending handshake datagrams.
pub const MAX_QUEUED_HANDSHAKES: usize = 4096;
/// Maximum handshake entries one drain invocation will process before
/// yielding the worker back to the scheduler.
pub const MAX_BURST_HANDSHAKES: usize = 16;

/// Build-time knobs for a device. The defaults match production sizing; tests
/// shrink the backlog to exercise the load and capacity edges.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub max_queued_handshakes: usize,
    pub max_burst_handshakes: usize,
    /// Device-wide key that handshake senders use for their first MAC.
    pub cookie_mac_key: [u8; 32],
}

impl DeviceConfig {
    pub fn new(cookie_mac_key: [u8; 32]) -> Self {
        Self {
            max_queued_handshakes: MAX_QUEUED_HANDSHAKES,
            max_burst_handshakes: MAX_BURST_HANDSHAKES,
            cookie_mac_key,
        }
    }

    pub fn with_max_queued_handshakes(mut self, capacity: usize) -> Self {
        self.max_queued_handshakes = capacity.max(1);
        self
    }

    pub fn with_max_burst_handshakes(mut self, burst: usize) -> Self {
        self.max_burst_handshakes = burst.max(1);
        self
    }
}

/// External subsystems a device is wired to at construction time.
#[derive(Clone)]
pub struct Externals {
    pub noise: Arc<dyn Noise>,
    pub routes: Arc<dyn Routes>,
    pub timers: Arc<dyn TimerSink>,
    pub outbound: Arc<dyn Outbound>,
    pub decrypt: Arc<dyn TransportDecrypt>,
    pub sink: Arc<dyn PacketSink>,
}

struct Inner {
    cookie: CookieChecker,
    backlog: Backlog,
    metrics: DeviceMetrics,
    ext: Externals,
    burst: usize,
}

/// A tunnel device's receive pipeline. Cheap to clone; all clones share the
/// same backlog, cookie checker, and counters.
#[derive(Clone)]
pub struct Device {
    inner: Arc<Inner>,
}

impl Device {
    /// Wire up a device. Must be called within a tokio runtime context, since
    /// handshake arrivals schedule the backlog drain with `tokio::spawn`.
    pub fn new(config: DeviceConfig, ext: Externals) -> Self {
        Self {
            inner: Arc::new(Inner {
                cookie: CookieChecker::new(config.cookie_mac_key),
                backlog: Backlog::new(config.max_queued_handshakes),
                metrics: DeviceMetrics::default(),
                ext,
                burst: config.max_burst_handshakes,
            }),
        }
    }

    /// Sole ingress for raw inbound datagrams.
    ///
    /// Never blocks: handshake-class messages are queued for the asynchronous
    /// worker, and transport messages go straight to the external decrypt
    /// stage. Malformed datagrams are dropped silently — an attacker probing
    /// the framing gets no feedback beyond debug-level diagnostics.
    pub fn receive(&self, datagram: Bytes, src: SocketAddr) {
        let payload = match envelope::parse(&datagram) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(target: "trellis::recv", %src, error = %err, "dropping malformed datagram");
                return;
            }
        };

        match message::classify(payload.slice(&datagram)) {
            Ok(MessageKind::Data) => {
                let outcome = self
                    .inner
                    .ext
                    .decrypt
                    .decrypt_and_decapsulate(datagram, payload, src);
                self.receive_decrypted(outcome);
            }
            Ok(kind) => self.enqueue_handshake(kind, datagram, src),
            Err(err) => {
                debug!(target: "trellis::recv", %src, error = %err, "dropping unrecognized message");
            }
        }
    }

    fn enqueue_handshake(&self, kind: MessageKind, datagram: Bytes, src: SocketAddr) {
        match self.inner.backlog.push(datagram, src) {
            Ok(()) => {
                self.inner.metrics.record_handshake_queued();
                self.schedule_drain();
            }
            Err(QueueFull) => {
                self.inner.metrics.record_backlog_full();
                debug!(
                    target: "trellis::handshake",
                    %src,
                    ?kind,
                    "too many handshakes queued, dropping datagram"
                );
            }
        }
    }

    fn schedule_drain(&self) {
        if self.inner.backlog.try_schedule() {
            self.spawn_drain();
        }
    }

    fn spawn_drain(&self) {
        let device = self.clone();
        tokio::spawn(async move {
            device.process_queued_handshakes();
        });
    }

    /// Drain up to the configured burst of queued handshake datagrams, in
    /// FIFO order. If entries remain afterwards, a follow-up drain is
    /// scheduled rather than looping, so a handshake flood cannot monopolize
    /// the worker. Returns the number of entries processed.
    pub fn process_queued_handshakes(&self) -> usize {
        let mut processed = 0;
        while processed < self.inner.burst {
            let Some(entry) = self.inner.backlog.pop() else {
                break;
            };
            // Re-validate: the entry was framed under possibly different
            // conditions when it was queued.
            if let Ok(payload) = envelope::parse(&entry.datagram) {
                self.handle_handshake_message(&entry.datagram, payload, entry.src);
            }
            processed += 1;
        }

        if !self.inner.backlog.is_empty() {
            self.inner.backlog.keep_scheduled();
            self.spawn_drain();
            return processed;
        }

        self.inner.backlog.clear_scheduled();
        // An arrival may have raced the emptiness check above; make sure it
        // is not stranded without a drain.
        if !self.inner.backlog.is_empty() {
            self.schedule_drain();
        }
        processed
    }

    /// Number of handshake datagrams currently awaiting the drain task.
    pub fn queued_handshakes(&self) -> usize {
        self.inner.backlog.len()
    }

    /// The device's cookie checker, shared with the outbound handshake path
    /// so it can stamp MACs onto outgoing messages.
    pub fn cookie_checker(&self) -> &CookieChecker {
        &self.inner.cookie
    }

    pub fn metrics(&self) -> &DeviceMetrics {
        &self.inner.metrics
    }
}
