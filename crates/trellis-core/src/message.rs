//! Message classification.
//!
//! Every tunnel message begins with a 4-byte little-endian type tag. Handshake
//! messages have fixed sizes so the cookie and handshake subsystems never see
//! a truncated body; transport messages only have a minimum.

use thiserror::Error;

/// Wire tag for a handshake initiation.
const TAG_HANDSHAKE_INITIATION: u32 = 1;
/// Wire tag for a handshake response.
const TAG_HANDSHAKE_RESPONSE: u32 = 2;
/// Wire tag for a cookie reply.
const TAG_HANDSHAKE_COOKIE: u32 = 3;
/// Wire tag for an encrypted transport datagram.
const TAG_DATA: u32 = 4;

/// Exact size of a handshake initiation message, including both MAC fields.
pub const HANDSHAKE_INITIATION_LEN: usize = 148;
/// Exact size of a handshake response message, including both MAC fields.
pub const HANDSHAKE_RESPONSE_LEN: usize = 92;
/// Exact size of a cookie reply message.
pub const COOKIE_REPLY_LEN: usize = 64;
/// Minimum size of a transport message: tag, receiver index, counter, AEAD tag.
pub const DATA_MIN_LEN: usize = 32;

/// High-level kind of a classified tunnel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    HandshakeInitiation,
    HandshakeResponse,
    HandshakeCookie,
    Data,
}

impl MessageKind {
    /// True for the message kinds that travel through the handshake backlog.
    pub fn is_handshake(self) -> bool {
        !matches!(self, MessageKind::Data)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("payload too short for a message header")]
    Truncated,
    #[error("unrecognized message tag {0}")]
    Unrecognized(u32),
}

/// Determine the message kind from a validated payload.
///
/// A recognized tag with the wrong length is treated the same as an unknown
/// tag: the message cannot have been produced by a conforming sender, so it is
/// not worth distinguishing for an attacker's benefit.
pub fn classify(payload: &[u8]) -> Result<MessageKind, MessageError> {
    if payload.len() < 4 {
        return Err(MessageError::Truncated);
    }
    let tag = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    match tag {
        TAG_HANDSHAKE_INITIATION if payload.len() == HANDSHAKE_INITIATION_LEN => {
            Ok(MessageKind::HandshakeInitiation)
        }
        TAG_HANDSHAKE_RESPONSE if payload.len() == HANDSHAKE_RESPONSE_LEN => {
            Ok(MessageKind::HandshakeResponse)
        }
        TAG_HANDSHAKE_COOKIE if payload.len() == COOKIE_REPLY_LEN => {
            Ok(MessageKind::HandshakeCookie)
        }
        TAG_DATA if payload.len() >= DATA_MIN_LEN => Ok(MessageKind::Data),
        other => Err(MessageError::Unrecognized(other)),
    }
}

/// Extract the sender's session index from an initiation or response message.
///
/// The index sits directly after the type tag and addresses the cookie reply
/// when the sender must re-prove reachability.
pub fn sender_index(payload: &[u8]) -> Option<u32> {
    let bytes = payload.get(4..8)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Build the little-endian header tag for a given kind. Used when
/// constructing cookie replies and by tests that synthesize messages.
pub fn tag_for(kind: MessageKind) -> [u8; 4] {
    let tag = match kind {
        MessageKind::HandshakeInitiation => TAG_HANDSHAKE_INITIATION,
        MessageKind::HandshakeResponse => TAG_HANDSHAKE_RESPONSE,
        MessageKind::HandshakeCookie => TAG_HANDSHAKE_COOKIE,
        MessageKind::Data => TAG_DATA,
    };
    tag.to_le_bytes()
}
