//! Device-wide receive counters.
//!
//! Counters are plain relaxed atomics: the admission path may run on many
//! decrypt workers in parallel and only ever increments, so no stronger
//! ordering is needed.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DeviceMetrics {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    rx_length_errors: AtomicU64,
    rx_frame_errors: AtomicU64,
    rx_dropped: AtomicU64,
    keepalives_received: AtomicU64,
    cookies_sent: AtomicU64,
    handshakes_queued: AtomicU64,
    handshakes_dropped_queue_full: AtomicU64,
}

/// Point-in-time copy of the device counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub rx_length_errors: u64,
    pub rx_frame_errors: u64,
    pub rx_dropped: u64,
    pub keepalives_received: u64,
    pub cookies_sent: u64,
    pub handshakes_queued: u64,
    pub handshakes_dropped_queue_full: u64,
}

impl DeviceMetrics {
    pub(crate) fn record_rx(&self, len: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_length_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
        self.rx_length_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
        self.rx_frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_keepalive(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cookie_sent(&self) {
        self.cookies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handshake_queued(&self) {
        self.handshakes_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backlog_full(&self) {
        self.handshakes_dropped_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            rx_length_errors: self.rx_length_errors.load(Ordering::Relaxed),
            rx_frame_errors: self.rx_frame_errors.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            keepalives_received: self.keepalives_received.load(Ordering::Relaxed),
            cookies_sent: self.cookies_sent.load(Ordering::Relaxed),
            handshakes_queued: self.handshakes_queued.load(Ordering::Relaxed),
            handshakes_dropped_queue_full: self
                .handshakes_dropped_queue_full
                .load(Ordering::Relaxed),
        }
    }
}
