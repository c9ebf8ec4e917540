//! Pure, allocation-light functions for parsing and serializing the SOCKS5
//! wire frames this proxy understands: client greeting, username/password
//! sub-negotiation, and the CONNECT request/response pair. No I/O happens
//! here; callers own buffering and framing.
//!
//! Every decode function reports [`CodecError::Truncated`] rather than
//! treating a short buffer as malformed, so a caller can accumulate bytes
//! across reads until a full frame is available (see the `Session` frame
//! reassembly loop in `socks5-session`).

use socks5_types::{AddrType, DestAddr};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

pub const NO_AUTH_REQUIRED: u8 = 0x00;
pub const USERNAME_PASSWORD: u8 = 0x02;
pub const NO_ACCEPTABLE_METHODS: u8 = 0xFF;

pub const REQUEST_GRANTED: u8 = 0x00;
pub const CONNECTION_REFUSED: u8 = 0x05;

const CMD_CONNECT: u8 = 0x01;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame incomplete, need more bytes")]
    Truncated,
    #[error("unsupported SOCKS version byte {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("client greeting advertised zero authentication methods")]
    NoMethods,
    #[error("unsupported command {0:#04x}, only CONNECT is implemented")]
    UnsupportedCommand(u8),
    #[error("reserved byte must be zero, got {0:#04x}")]
    InvalidReserved(u8),
    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),
    #[error("domain name is not valid ASCII")]
    InvalidDomain,
    #[error("domain name too long to encode ({0} bytes)")]
    DomainTooLong(usize),
}

/// Decodes a client greeting, returning the advertised auth methods and the
/// number of bytes consumed from `data`.
pub fn decode_greeting(data: &[u8]) -> Result<(Vec<u8>, usize), CodecError> {
    if data.len() < 2 {
        return Err(CodecError::Truncated);
    }

    let version = data[0];
    if version != SOCKS_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let n_methods = usize::from(data[1]);
    if n_methods == 0 {
        return Err(CodecError::NoMethods);
    }

    let needed = 2 + n_methods;
    if data.len() < needed {
        return Err(CodecError::Truncated);
    }

    Ok((data[2..needed].to_vec(), needed))
}

/// Picks the method the server will use, preferring username/password over
/// no-auth, per the server's own advertised preference (not the client's).
pub fn choose_auth_method(methods: &[u8]) -> u8 {
    if methods.contains(&USERNAME_PASSWORD) {
        USERNAME_PASSWORD
    } else if methods.contains(&NO_AUTH_REQUIRED) {
        NO_AUTH_REQUIRED
    } else {
        NO_ACCEPTABLE_METHODS
    }
}

pub fn encode_greeting_response(chosen_method: u8) -> [u8; 2] {
    [SOCKS_VERSION, chosen_method]
}

/// Decodes the RFC 1929 username/password sub-negotiation frame.
pub fn decode_username_password(data: &[u8]) -> Result<((Vec<u8>, Vec<u8>), usize), CodecError> {
    if data.len() < 2 {
        return Err(CodecError::Truncated);
    }

    let version = data[0];
    if version != AUTH_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let ulen = usize::from(data[1]);
    if data.len() < 2 + ulen + 1 {
        return Err(CodecError::Truncated);
    }

    let plen_index = 2 + ulen;
    let plen = usize::from(data[plen_index]);
    let needed = plen_index + 1 + plen;
    if data.len() < needed {
        return Err(CodecError::Truncated);
    }

    let username = data[2..plen_index].to_vec();
    let password = data[plen_index + 1..needed].to_vec();

    Ok(((username, password), needed))
}

pub fn encode_auth_response(ok: bool) -> [u8; 2] {
    [AUTH_VERSION, if ok { 0x00 } else { 0xFF }]
}

/// Decodes a CONNECT request, returning the destination and bytes consumed.
/// Only the CONNECT command is accepted; BIND/UDP ASSOCIATE are out of
/// scope (see Non-goals) and surface as [`CodecError::UnsupportedCommand`].
pub fn decode_connection_request(data: &[u8]) -> Result<(DestAddr, usize), CodecError> {
    if data.len() < 4 {
        return Err(CodecError::Truncated);
    }

    let version = data[0];
    if version != SOCKS_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let cmd = data[1];
    if cmd != CMD_CONNECT {
        return Err(CodecError::UnsupportedCommand(cmd));
    }

    let reserved = data[2];
    if reserved != 0x00 {
        return Err(CodecError::InvalidReserved(reserved));
    }

    match data[3] {
        0x01 => {
            let needed = 4 + 4 + 2;
            if data.len() < needed {
                return Err(CodecError::Truncated);
            }
            let ip = Ipv4Addr::new(data[4], data[5], data[6], data[7]);
            let port = u16::from_be_bytes([data[8], data[9]]);
            Ok((DestAddr::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port))), needed))
        }
        0x03 => {
            if data.len() < 5 {
                return Err(CodecError::Truncated);
            }
            let alen = usize::from(data[4]);
            let needed = 5 + alen + 2;
            if data.len() < needed {
                return Err(CodecError::Truncated);
            }
            let domain_bytes = &data[5..5 + alen];
            if !domain_bytes.is_ascii() {
                return Err(CodecError::InvalidDomain);
            }
            let domain = String::from_utf8_lossy(domain_bytes).into_owned();
            let port = u16::from_be_bytes([data[5 + alen], data[6 + alen]]);
            Ok((DestAddr::Domain(domain, port), needed))
        }
        0x04 => {
            let needed = 4 + 16 + 2;
            if data.len() < needed {
                return Err(CodecError::Truncated);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[4..20]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([data[20], data[21]]);
            Ok((DestAddr::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))), needed))
        }
        other => Err(CodecError::UnsupportedAddressType(other)),
    }
}

/// Encodes a CONNECT response. `bound` must be the server's own local
/// endpoint reached to serve the request, never the client's requested
/// host — encoding a domain name in a reply is a protocol violation this
/// function refuses rather than silently dropping (see design notes on the
/// `_connection_response` bug in the original implementation).
pub fn encode_connection_response(bound: &DestAddr, status: u8) -> Result<Vec<u8>, CodecError> {
    let mut packet = vec![SOCKS_VERSION, status, 0x00];

    match bound {
        DestAddr::Ip(SocketAddr::V4(addr)) => {
            packet.push(AddrType::V4 as u8);
            packet.extend_from_slice(&addr.ip().octets());
            packet.extend_from_slice(&addr.port().to_be_bytes());
        }
        DestAddr::Ip(SocketAddr::V6(addr)) => {
            packet.push(AddrType::V6 as u8);
            packet.extend_from_slice(&addr.ip().octets());
            packet.extend_from_slice(&addr.port().to_be_bytes());
        }
        DestAddr::Domain(domain, port) => {
            let len = u8::try_from(domain.len()).map_err(|_| CodecError::DomainTooLong(domain.len()))?;
            packet.push(AddrType::Domain as u8);
            packet.push(len);
            packet.extend_from_slice(domain.as_bytes());
            packet.extend_from_slice(&port.to_be_bytes());
        }
    }

    Ok(packet)
}
