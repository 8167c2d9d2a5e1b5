//! Wire-level primitives for the trellis tunnel.
//!
//! This crate keeps the surface small: envelope framing validation, message
//! classification, the stateless cookie challenge, and the opaque peer handle
//! shared with the device pipeline. The handshake state machine and AEAD
//! transport crypto live behind the device's external interfaces.

pub mod cookie;
pub mod envelope;
pub mod message;
pub mod peer;

pub use cookie::{
    cookie_policy, CookieChecker, CookieDecision, CookieError, CookieReply, MacState, COOKIE_LEN,
    COOKIE_SECRET_MAX_AGE, MACS_LEN, MAC_LEN,
};
pub use envelope::{
    plaintext_family, FramingError, IpFamily, Payload, IPV4_HEADER_MIN, IPV6_HEADER_LEN,
    MESSAGE_HEADER_LEN, UDP_HEADER_LEN,
};
pub use message::{
    classify, sender_index, MessageError, MessageKind, COOKIE_REPLY_LEN, DATA_MIN_LEN,
    HANDSHAKE_INITIATION_LEN, HANDSHAKE_RESPONSE_LEN,
};
pub use peer::{Peer, PeerHandle};
