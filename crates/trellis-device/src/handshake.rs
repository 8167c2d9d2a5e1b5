//! Handshake message handling for the backlog drain task.
//!
//! The drain task re-classifies each dequeued datagram, applies the cookie
//! policy under the current load flag, and only then hands the message to the
//! handshake-crypto subsystem. Rejections at every stage are silent: a blind
//! sender learns nothing, and a legitimate one either gets a cookie reply or
//! a handshake response.

use bytes::Bytes;
use std::net::SocketAddr;
use tracing::debug;
use trellis_core::{
    cookie_policy, message, CookieDecision, MessageKind, Payload, PeerHandle,
};

use crate::Device;

impl Device {
    pub(crate) fn handle_handshake_message(
        &self,
        datagram: &Bytes,
        payload: Payload,
        src: SocketAddr,
    ) {
        let msg = payload.slice(datagram);
        let kind = match message::classify(msg) {
            Ok(kind) => kind,
            Err(err) => {
                debug!(target: "trellis::handshake", %src, error = %err, "queued datagram no longer classifies");
                return;
            }
        };

        match kind {
            MessageKind::HandshakeCookie => {
                debug!(target: "trellis::handshake", %src, "receiving cookie reply");
                if let Err(err) = self.inner.cookie.consume_reply(msg) {
                    debug!(target: "trellis::handshake", %src, error = %err, "discarding bad cookie reply");
                }
                return;
            }
            MessageKind::HandshakeInitiation | MessageKind::HandshakeResponse => {}
            MessageKind::Data => {
                // The classifier routes transport messages to the decrypt
                // path; one ending up here means dispatch itself is broken.
                unreachable!("transport message reached the handshake queue");
            }
        }

        let under_load = self.inner.backlog.under_load();
        let mac_state = self.inner.cookie.validate_mac(msg, src, under_load);
        match cookie_policy(under_load, mac_state) {
            CookieDecision::Drop => {
                debug!(target: "trellis::handshake", %src, "invalid handshake mac, dropping");
                return;
            }
            CookieDecision::SendCookie => {
                let Some(index) = message::sender_index(msg) else {
                    return;
                };
                let reply = self.inner.cookie.create_reply(index, src);
                self.inner.ext.outbound.send_cookie_reply(src, reply);
                self.inner.metrics.record_cookie_sent();
                return;
            }
            CookieDecision::Proceed => {}
        }

        match kind {
            MessageKind::HandshakeInitiation => {
                let Some(peer) = self.inner.ext.noise.consume_initiation(msg) else {
                    debug!(target: "trellis::handshake", %src, "invalid handshake initiation");
                    return;
                };
                debug!(
                    target: "trellis::handshake",
                    peer = peer.id(),
                    %src,
                    "receiving handshake initiation"
                );
                peer.set_endpoint(src);
                self.inner.ext.outbound.send_handshake_response(&peer);
                self.handshake_epilogue(&peer, payload.len, src);
            }
            MessageKind::HandshakeResponse => {
                let Some(peer) = self.inner.ext.noise.consume_response(msg) else {
                    debug!(target: "trellis::handshake", %src, "invalid handshake response");
                    return;
                };
                debug!(
                    target: "trellis::handshake",
                    peer = peer.id(),
                    %src,
                    "receiving handshake response"
                );
                if self.inner.ext.noise.begin_session(&peer, true) {
                    self.inner.ext.timers.ephemeral_key_created(&peer);
                    self.inner.ext.timers.handshake_complete(&peer);
                    self.inner.ext.outbound.flush_queued_packets(&peer);
                }
                self.handshake_epilogue(&peer, payload.len, src);
            }
            _ => unreachable!("cookie replies return before the proceed branch"),
        }
    }

    /// Exactly-once completion for a successfully consumed handshake message:
    /// receive accounting, the authorized-packet timer event, and the
    /// last-address refresh. The peer handle drops — releasing the reference
    /// acquired from the handshake subsystem — when the caller's scope ends.
    fn handshake_epilogue(&self, peer: &PeerHandle, len: usize, src: SocketAddr) {
        peer.record_rx(len);
        self.inner.metrics.record_rx(len);
        self.inner.ext.timers.any_authorized_packet_received(peer);
        peer.set_endpoint(src);
    }
}
