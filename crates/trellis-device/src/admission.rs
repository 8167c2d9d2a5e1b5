//! Post-decryption packet admission.
//!
//! Runs in whatever context the external decrypt stage completes on, possibly
//! many packets in parallel; it mutates nothing beyond atomic counters and
//! per-peer fields. Decryption proved the datagram came from the peer, but
//! not that the peer is allowed to originate the plaintext inside it — that
//! is the anti-spoofing lookup below.

use bytes::Bytes;
use std::net::SocketAddr;
use tracing::debug;
use trellis_core::{plaintext_family, PeerHandle};

use crate::externals::{DecryptOutcome, DecryptStatus, TunPacket};
use crate::Device;

impl Device {
    /// Admission callback for the external decrypt stage.
    ///
    /// On every path that reaches an authenticated peer — delivery, keepalive,
    /// or validation drop — the authorized-packet timer fires once, the
    /// peer's last known address is refreshed once, and the peer reference
    /// from the decrypt stage is released exactly once.
    pub fn receive_decrypted(&self, outcome: DecryptOutcome) {
        let DecryptOutcome {
            packet,
            peer,
            endpoint,
            used_new_key,
            status,
        } = outcome;

        // A failed or unattributed decryption carries no signal; discard
        // without touching timers or counters.
        let (Some(peer), Some(endpoint)) = (peer, endpoint) else {
            return;
        };
        if status == DecryptStatus::Failure {
            return;
        }

        if used_new_key {
            // Traffic staged while the session was pending can go out now.
            self.inner.ext.outbound.flush_queued_packets(&peer);
        }

        if packet.is_empty() {
            self.inner.metrics.record_keepalive();
            debug!(
                target: "trellis::recv",
                peer = peer.id(),
                %endpoint,
                "receiving keepalive packet"
            );
        } else {
            self.admit_plaintext(&packet, &peer, endpoint);
        }

        self.inner.ext.timers.any_authorized_packet_received(&peer);
        peer.set_endpoint(endpoint);
    }

    fn admit_plaintext(&self, packet: &Bytes, peer: &PeerHandle, endpoint: SocketAddr) {
        let family = match plaintext_family(packet) {
            Ok(family) => family,
            Err(err) => {
                self.inner.metrics.record_length_error();
                debug!(
                    target: "trellis::recv",
                    peer = peer.id(),
                    %endpoint,
                    error = %err,
                    "plaintext is not a valid network-layer packet"
                );
                return;
            }
        };

        self.inner.ext.timers.data_received(peer);

        let routed = self.inner.ext.routes.lookup_source(packet);
        let authorized = routed.as_ref().map(|routed| routed.id()) == Some(peer.id());
        drop(routed); // the lookup's extra peer reference is not needed
        if !authorized {
            self.inner.metrics.record_frame_error();
            debug!(
                target: "trellis::recv",
                peer = peer.id(),
                %endpoint,
                "plaintext has a source address the peer is not authorized for"
            );
            return;
        }

        let delivery = self.inner.ext.sink.deliver(TunPacket {
            family,
            checksum_verified: true,
            bytes: packet.clone(),
        });
        match delivery {
            Ok(()) => {
                peer.record_rx(packet.len());
                self.inner.metrics.record_rx(packet.len());
            }
            Err(err) => {
                self.inner.metrics.record_dropped();
                debug!(
                    target: "trellis::recv",
                    peer = peer.id(),
                    %endpoint,
                    error = %err,
                    "failed to hand packet to the local stack"
                );
            }
        }
    }
}
