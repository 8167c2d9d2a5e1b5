//! Interfaces consumed by the receive pipeline.
//!
//! The pipeline never runs handshake crypto, AEAD, routing lookups, timers,
//! or socket I/O itself; those subsystems are reached through the narrow
//! traits below. Every trait is object-safe and shared behind an `Arc` so the
//! backlog worker and parallel decrypt completions can hold them freely.

use bytes::Bytes;
use std::net::SocketAddr;
use thiserror::Error;
use trellis_core::{CookieReply, IpFamily, Payload, PeerHandle};

/// Handshake-crypto entry points. Consuming a message either yields a
/// reference-counted peer handle or rejects the message outright; the caller
/// owns the returned handle and must let it drop exactly once.
pub trait Noise: Send + Sync {
    fn consume_initiation(&self, payload: &[u8]) -> Option<PeerHandle>;
    fn consume_response(&self, payload: &[u8]) -> Option<PeerHandle>;
    /// Derive a live session from a completed handshake. `new_key_is_initiator`
    /// is true when the new key was created by our own initiation.
    fn begin_session(&self, peer: &PeerHandle, new_key_is_initiator: bool) -> bool;
}

/// Authorized-source routing table used for the anti-spoofing check.
pub trait Routes: Send + Sync {
    /// Look up the peer authorized to originate the source address embedded
    /// in a plaintext packet.
    fn lookup_source(&self, packet: &[u8]) -> Option<PeerHandle>;
}

/// Per-peer timer notifications.
pub trait TimerSink: Send + Sync {
    fn ephemeral_key_created(&self, peer: &PeerHandle);
    fn handshake_complete(&self, peer: &PeerHandle);
    fn data_received(&self, peer: &PeerHandle);
    fn any_authorized_packet_received(&self, peer: &PeerHandle);
}

/// Outbound replies and queued-traffic flushing, backed by the socket layer.
pub trait Outbound: Send + Sync {
    fn send_cookie_reply(&self, dst: SocketAddr, reply: CookieReply);
    fn send_handshake_response(&self, peer: &PeerHandle);
    /// Send any packets staged on the peer while no session was live.
    fn flush_queued_packets(&self, peer: &PeerHandle);
}

/// Whether AEAD decryption and decapsulation of a transport datagram
/// succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptStatus {
    Success,
    Failure,
}

/// Completion of the external decrypt stage, fed into the admission path.
///
/// When `status` is [`DecryptStatus::Failure`], or either optional field is
/// absent, the packet carries no authenticated signal and is discarded
/// without inspection.
#[derive(Debug)]
pub struct DecryptOutcome {
    /// Decrypted plaintext; zero-length for keepalives.
    pub packet: Bytes,
    /// The peer whose session key decrypted the datagram.
    pub peer: Option<PeerHandle>,
    /// Observed source address of the UDP envelope.
    pub endpoint: Option<SocketAddr>,
    /// True when this datagram activated a freshly negotiated session key.
    pub used_new_key: bool,
    pub status: DecryptStatus,
}

/// AEAD decryption and decapsulation of transport-class datagrams.
pub trait TransportDecrypt: Send + Sync {
    fn decrypt_and_decapsulate(
        &self,
        datagram: Bytes,
        payload: Payload,
        src: SocketAddr,
    ) -> DecryptOutcome;
}

/// A validated plaintext packet on its way to the local network stack.
#[derive(Debug, Clone)]
pub struct TunPacket {
    pub family: IpFamily,
    /// The AEAD tag already authenticated the payload, so the local stack can
    /// skip transport checksum validation.
    pub checksum_verified: bool,
    pub bytes: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("local network stack refused the packet")]
pub struct DeliveryRefused;

/// Local delivery sink for admitted packets.
pub trait PacketSink: Send + Sync {
    fn deliver(&self, packet: TunPacket) -> Result<(), DeliveryRefused>;
}
