//! Bounded handshake backlog.
//!
//! Unauthenticated handshake traffic is the cheapest thing an attacker can
//! send, so everything about this queue is bounded: a fixed capacity that
//! drops new arrivals rather than evicting old ones, and a single-flight
//! drain task that processes a fixed burst before yielding the worker.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// A handshake-class datagram waiting for the drain task.
#[derive(Debug)]
pub(crate) struct QueuedHandshake {
    pub datagram: Bytes,
    pub src: SocketAddr,
}

/// The backlog was at capacity; the datagram was dropped, not queued.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("handshake backlog at capacity")]
pub struct QueueFull;

#[derive(Debug)]
pub(crate) struct Backlog {
    entries: Mutex<VecDeque<QueuedHandshake>>,
    scheduled: AtomicBool,
    capacity: usize,
}

impl Backlog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            capacity,
        }
    }

    /// Append a datagram, unless the queue is full. Entries are never evicted
    /// to make room; rejecting the newcomer is the backpressure mechanism.
    pub(crate) fn push(&self, datagram: Bytes, src: SocketAddr) -> Result<(), QueueFull> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(QueueFull);
        }
        entries.push_back(QueuedHandshake { datagram, src });
        Ok(())
    }

    pub(crate) fn pop(&self) -> Option<QueuedHandshake> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Load signal for the cookie policy: half the backlog capacity.
    pub(crate) fn under_load(&self) -> bool {
        self.len() >= self.capacity / 2
    }

    /// Claim the right to spawn the drain task. Returns false when a drain is
    /// already scheduled or running.
    pub(crate) fn try_schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Keep the schedule claim while handing off to a follow-up drain task.
    pub(crate) fn keep_scheduled(&self) {
        self.scheduled.store(true, Ordering::Release);
    }

    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }
}
