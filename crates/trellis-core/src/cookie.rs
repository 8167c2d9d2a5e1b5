//! Stateless cookie challenge for handshake denial-of-service mitigation.
//!
//! Handshake messages carry two truncated MACs. The first binds the message to
//! this device and is always required. The second proves the sender echoed a
//! cookie we recently minted for its source address; it is only demanded while
//! the device is under load, forcing a flooding sender to prove return-path
//! reachability before we spend asymmetric-crypto effort on it.
//!
//! Cookies are derived from a device secret that rotates on a fixed interval,
//! so a leaked or replayed cookie goes stale on its own.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::Sha3_256;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::message::{self, MessageKind, COOKIE_REPLY_LEN};

/// Truncated MAC length on the wire.
pub const MAC_LEN: usize = 16;
/// Combined trailer carried by every handshake message: mac1 then mac2.
pub const MACS_LEN: usize = 2 * MAC_LEN;
/// Cookie value length.
pub const COOKIE_LEN: usize = 16;
/// Cookies minted from a secret older than this no longer validate.
pub const COOKIE_SECRET_MAX_AGE: Duration = Duration::from_secs(2 * 60);

const REPLY_NONCE_LEN: usize = 24;
const REPLY_SEALED_LEN: usize = 32;

type CookieMac = Hmac<Sha3_256>;

/// Outcome of validating the MAC trailer of a handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    /// mac1 failed; the message was not built for this device.
    Invalid,
    /// mac1 passed but no fresh cookie was echoed.
    ValidNoCookie,
    /// mac1 passed and mac2 echoes a cookie minted for this source.
    ValidWithCookie,
}

/// What the receive path should do with a handshake message, given the load
/// flag and the MAC outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieDecision {
    Proceed,
    SendCookie,
    Drop,
}

/// The load/MAC decision table. Note that a cookie echoed while the device is
/// not under load is simply accepted; the sender is never penalized for
/// over-proving.
pub fn cookie_policy(under_load: bool, state: MacState) -> CookieDecision {
    match (under_load, state) {
        (_, MacState::Invalid) => CookieDecision::Drop,
        (false, _) => CookieDecision::Proceed,
        (true, MacState::ValidWithCookie) => CookieDecision::Proceed,
        (true, MacState::ValidNoCookie) => CookieDecision::SendCookie,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie reply was truncated")]
    Truncated,
    #[error("cookie reply carries the wrong message tag")]
    WrongTag,
}

/// A minted cookie reply, addressed by the sender's own session index.
///
/// The sealed slot is laid out for an AEAD-protected cookie; sealing itself
/// belongs to the handshake-crypto subsystem, so the checker writes the
/// cookie value with a fresh nonce and leaves the tag bytes zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieReply {
    pub receiver_index: u32,
    pub nonce: [u8; REPLY_NONCE_LEN],
    pub cookie: [u8; COOKIE_LEN],
}

impl CookieReply {
    /// Encode to the fixed-size wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(COOKIE_REPLY_LEN);
        buf.extend_from_slice(&message::tag_for(MessageKind::HandshakeCookie));
        buf.extend_from_slice(&self.receiver_index.to_le_bytes());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.cookie);
        buf.resize(COOKIE_REPLY_LEN, 0);
        buf
    }
}

struct RotatingSecret {
    secret: [u8; 32],
    birth: Instant,
}

/// Validates handshake MACs and mints cookie replies for one device.
pub struct CookieChecker {
    mac_key: [u8; 32],
    secret: Mutex<RotatingSecret>,
    last_received: Mutex<Option<[u8; COOKIE_LEN]>>,
}

impl CookieChecker {
    /// `mac_key` is the device-wide key senders use for mac1; in a full
    /// deployment it is derived from the device's static public key.
    pub fn new(mac_key: [u8; 32]) -> Self {
        Self {
            mac_key,
            secret: Mutex::new(RotatingSecret {
                secret: fresh_secret(),
                birth: Instant::now(),
            }),
            last_received: Mutex::new(None),
        }
    }

    /// Validate the MAC trailer of a handshake message from `src`.
    ///
    /// mac2 is only examined while under load; when the device is idle a bare
    /// mac1 is sufficient and the cookie math is skipped entirely.
    pub fn validate_mac(&self, msg: &[u8], src: SocketAddr, under_load: bool) -> MacState {
        self.validate_mac_at(msg, src, under_load, Instant::now())
    }

    fn validate_mac_at(
        &self,
        msg: &[u8],
        src: SocketAddr,
        under_load: bool,
        now: Instant,
    ) -> MacState {
        if msg.len() < MACS_LEN + 4 {
            return MacState::Invalid;
        }
        let mac2_at = msg.len() - MAC_LEN;
        let mac1_at = mac2_at - MAC_LEN;

        let expected_mac1 = keyed_mac(&self.mac_key, &msg[..mac1_at]);
        if expected_mac1.ct_eq(&msg[mac1_at..mac2_at]).unwrap_u8() == 0 {
            return MacState::Invalid;
        }
        if !under_load {
            return MacState::ValidNoCookie;
        }

        let cookie = self.cookie_for(src, now);
        let expected_mac2 = keyed_mac(&cookie, &msg[..mac2_at]);
        if expected_mac2.ct_eq(&msg[mac2_at..]).unwrap_u8() == 1 {
            MacState::ValidWithCookie
        } else {
            MacState::ValidNoCookie
        }
    }

    /// Mint a cookie reply for `src`, addressed by the session index the
    /// sender embedded in its handshake message.
    pub fn create_reply(&self, sender_index: u32, src: SocketAddr) -> CookieReply {
        let mut nonce = [0u8; REPLY_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        CookieReply {
            receiver_index: sender_index,
            nonce,
            cookie: self.cookie_for(src, Instant::now()),
        }
    }

    /// Record the cookie from a reply sent to us, for use in our own future
    /// handshake messages.
    pub fn consume_reply(&self, payload: &[u8]) -> Result<(), CookieError> {
        if payload.len() != COOKIE_REPLY_LEN {
            return Err(CookieError::Truncated);
        }
        if message::classify(payload) != Ok(MessageKind::HandshakeCookie) {
            return Err(CookieError::WrongTag);
        }
        let cookie_at = 4 + 4 + REPLY_NONCE_LEN;
        let mut cookie = [0u8; COOKIE_LEN];
        cookie.copy_from_slice(&payload[cookie_at..cookie_at + COOKIE_LEN]);
        *self.last_received.lock() = Some(cookie);
        Ok(())
    }

    /// Latest cookie received via [`CookieChecker::consume_reply`], if any.
    pub fn last_received_cookie(&self) -> Option<[u8; COOKIE_LEN]> {
        *self.last_received.lock()
    }

    /// Append the MAC trailer to an outgoing handshake message body.
    /// mac2 is zero unless the sender holds a cookie to echo.
    pub fn append_macs(&self, body: &mut Vec<u8>, cookie: Option<&[u8; COOKIE_LEN]>) {
        let mac1 = keyed_mac(&self.mac_key, body);
        body.extend_from_slice(&mac1);
        match cookie {
            Some(cookie) => {
                let mac2 = keyed_mac(cookie, body);
                body.extend_from_slice(&mac2);
            }
            None => body.extend_from_slice(&[0u8; MAC_LEN]),
        }
    }

    /// Derive the current cookie for a source address, rotating the secret
    /// first if it has exceeded its maximum age.
    fn cookie_for(&self, src: SocketAddr, now: Instant) -> [u8; COOKIE_LEN] {
        let mut state = self.secret.lock();
        if now.duration_since(state.birth) >= COOKIE_SECRET_MAX_AGE {
            state.secret = fresh_secret();
            state.birth = now;
        }

        let mut input = Vec::with_capacity(18);
        match src.ip() {
            std::net::IpAddr::V4(v4) => input.extend_from_slice(&v4.octets()),
            std::net::IpAddr::V6(v6) => input.extend_from_slice(&v6.octets()),
        }
        input.extend_from_slice(&src.port().to_be_bytes());
        keyed_mac(&state.secret, &input)
    }
}

fn fresh_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    secret
}

fn keyed_mac(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = CookieMac::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&tag[..MAC_LEN]);
    out
}
