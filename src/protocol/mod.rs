//! Wire protocol header
//!
//! Responsibilities:
//! - Authentication (credential digest comparison)
//! - Target address parsing
//! - Locating the start of the forwarded payload
//!
//! The header arrives as the first message on an upgraded session and may
//! be immediately followed by client payload in the same buffer. Parsing
//! is pure: no mutation, no I/O.
//!
//! Layout (big-endian), minimum 56 bytes:
//!
//! ```text
//! | offset | len | field                                   |
//! |--------|-----|-----------------------------------------|
//! | 0      | 28  | credential digest                       |
//! | 28     | 30  | skipped by the parser                   |
//! | 58     | 1   | command (1 = connect, 3 = udp associate)|
//! | 59     | 1   | address type (1 = ipv4, 3 = domain, 4 = ipv6) |
//! | 60     | var | address (4 / 1+N / 16 bytes)            |
//! | ..     | 2   | port                                    |
//! | ..     | 2   | reserved                                |
//! | ..     | --  | payload                                 |
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::auth::{Credential, CREDENTIAL_LEN};
use crate::common::{Address, Result};
use crate::error::Error;

/// Minimum header length before any field is inspected
pub const HEADER_MIN_LEN: usize = 56;

const COMMAND_OFFSET: usize = 58;
const ATYP_OFFSET: usize = 59;
const ADDR_OFFSET: usize = 60;

// Commands
const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Requested tunnel command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open a plain TCP tunnel
    Connect,
    /// Tunnel length-framed UDP datagrams (DNS only)
    UdpAssociate,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect => write!(f, "tcp"),
            Command::UdpAssociate => write!(f, "udp"),
        }
    }
}

/// Parsed wire header
#[derive(Debug, Clone)]
pub struct ProtocolHeader {
    pub command: Command,
    pub address: Address,
    /// Byte index where the forwarded payload begins. May point past the
    /// end of the buffer when the first message carries no payload.
    pub payload_offset: usize,
}

/// Parse and authenticate the wire header.
///
/// Validation is ordered and fails fast: length, credential, command,
/// address type, address value. Each failure is terminal for the session.
pub fn parse_header(buf: &[u8], credential: &Credential) -> Result<ProtocolHeader> {
    if buf.len() < HEADER_MIN_LEN {
        return Err(Error::Protocol("invalid data".into()));
    }

    if !credential.matches(&buf[..CREDENTIAL_LEN]) {
        return Err(Error::AuthFailed);
    }

    let command = match read_byte(buf, COMMAND_OFFSET)? {
        CMD_CONNECT => Command::Connect,
        CMD_UDP_ASSOCIATE => Command::UdpAssociate,
        other => return Err(Error::UnsupportedCommand(other)),
    };

    let atyp = read_byte(buf, ATYP_OFFSET)?;
    let (address, payload_offset) = match atyp {
        ATYP_IPV4 => {
            let octets: [u8; 4] = read_array(buf, ADDR_OFFSET)?;
            let port = read_port(buf, ADDR_OFFSET + 4)?;
            let addr = SocketAddr::from((Ipv4Addr::from(octets), port));
            (Address::Socket(addr), ADDR_OFFSET + 4 + 4)
        }
        ATYP_DOMAIN => {
            let len = read_byte(buf, ADDR_OFFSET)? as usize;
            if len == 0 {
                return Err(Error::Protocol("empty address".into()));
            }
            let start = ADDR_OFFSET + 1;
            let name = buf
                .get(start..start + len)
                .ok_or_else(|| Error::Protocol("invalid data".into()))?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| Error::Protocol("invalid domain encoding".into()))?;
            let port = read_port(buf, start + len)?;
            (Address::Domain(name, port), start + len + 4)
        }
        ATYP_IPV6 => {
            let octets: [u8; 16] = read_array(buf, ADDR_OFFSET)?;
            let port = read_port(buf, ADDR_OFFSET + 16)?;
            let addr = SocketAddr::from((Ipv6Addr::from(octets), port));
            (Address::Socket(addr), ADDR_OFFSET + 16 + 4)
        }
        other => {
            return Err(Error::Protocol(format!("invalid address type: {}", other)));
        }
    };

    Ok(ProtocolHeader {
        command,
        address,
        payload_offset,
    })
}

fn read_byte(buf: &[u8], offset: usize) -> Result<u8> {
    buf.get(offset)
        .copied()
        .ok_or_else(|| Error::Protocol("invalid data".into()))
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    let slice = buf
        .get(offset..offset + N)
        .ok_or_else(|| Error::Protocol("invalid data".into()))?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn read_port(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes: [u8; 2] = read_array(buf, offset)?;
    Ok(u16::from_be_bytes(bytes))
}
