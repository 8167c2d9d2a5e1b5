//! Outer-envelope validation for inbound datagrams.
//!
//! Inbound traffic arrives as a raw network-layer packet: an IPv4 or IPv6
//! header, a UDP header, and then the tunnel payload. Before anything else
//! touches a datagram we locate that payload and prove every length field is
//! self-consistent, so downstream stages can slice into the buffer without
//! re-checking bounds.

use thiserror::Error;

/// Smallest possible IPv4 header (IHL = 5).
pub const IPV4_HEADER_MIN: usize = 20;
/// Fixed IPv6 header size; extension headers are not traversed.
pub const IPV6_HEADER_LEN: usize = 40;
/// UDP header size.
pub const UDP_HEADER_LEN: usize = 8;
/// Every tunnel message starts with a 4-byte little-endian type tag.
pub const MESSAGE_HEADER_LEN: usize = 4;

/// Errors produced while locating the tunnel payload inside a datagram.
///
/// These are deliberately never surfaced to the sender and never logged above
/// debug level: a malformed envelope earns a silent drop, not a format oracle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("datagram shorter than minimal ip header")]
    Truncated,
    #[error("unrecognized ip version {0}")]
    IpVersion(u8),
    #[error("ipv4 header length field out of range")]
    HeaderLength,
    #[error("udp header extends past datagram end")]
    UdpOutOfBounds,
    #[error("udp length field smaller than udp header")]
    UdpLengthTooSmall,
    #[error("udp length field exceeds remaining datagram bytes")]
    UdpLengthOverrun,
    #[error("payload too short for a message header")]
    MissingMessageHeader,
}

/// Address family of a validated network-layer packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// Location of the tunnel payload within a validated datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub offset: usize,
    pub len: usize,
}

impl Payload {
    /// Borrow the payload bytes out of the datagram this value was parsed from.
    pub fn slice<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        &datagram[self.offset..self.offset + self.len]
    }
}

/// Validate the IP + UDP envelope and locate the tunnel payload.
///
/// The effective payload length comes from the UDP length field, not the
/// datagram tail, so trailing link-layer padding is excluded. A UDP header
/// claiming more data than the datagram actually carries is rejected.
pub fn parse(datagram: &[u8]) -> Result<Payload, FramingError> {
    if datagram.len() < IPV4_HEADER_MIN {
        return Err(FramingError::Truncated);
    }

    let version = datagram[0] >> 4;
    let udp_offset = match version {
        4 => {
            let ihl = usize::from(datagram[0] & 0x0f) * 4;
            if ihl < IPV4_HEADER_MIN {
                return Err(FramingError::HeaderLength);
            }
            ihl
        }
        6 => {
            if datagram.len() < IPV6_HEADER_LEN {
                return Err(FramingError::Truncated);
            }
            IPV6_HEADER_LEN
        }
        other => return Err(FramingError::IpVersion(other)),
    };

    if udp_offset + UDP_HEADER_LEN > datagram.len() {
        return Err(FramingError::UdpOutOfBounds);
    }

    let udp_len =
        usize::from(u16::from_be_bytes([datagram[udp_offset + 4], datagram[udp_offset + 5]]));
    if udp_len < UDP_HEADER_LEN {
        return Err(FramingError::UdpLengthTooSmall);
    }
    if udp_len > datagram.len() - udp_offset {
        return Err(FramingError::UdpLengthOverrun);
    }

    let payload = Payload {
        offset: udp_offset + UDP_HEADER_LEN,
        len: udp_len - UDP_HEADER_LEN,
    };
    if payload.len < MESSAGE_HEADER_LEN {
        return Err(FramingError::MissingMessageHeader);
    }
    Ok(payload)
}

/// Classify a decrypted plaintext packet as IPv4 or IPv6.
///
/// Used by the admission path after decryption: the plaintext must be large
/// enough for the minimal header of the version it declares.
pub fn plaintext_family(packet: &[u8]) -> Result<IpFamily, FramingError> {
    if packet.len() < IPV4_HEADER_MIN {
        return Err(FramingError::Truncated);
    }
    match packet[0] >> 4 {
        4 => Ok(IpFamily::V4),
        6 => {
            if packet.len() < IPV6_HEADER_LEN {
                return Err(FramingError::Truncated);
            }
            Ok(IpFamily::V6)
        }
        other => Err(FramingError::IpVersion(other)),
    }
}
