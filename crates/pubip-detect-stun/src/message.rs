//! STUN message codec (RFC 5389), limited to what a binding exchange needs
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0|     STUN Message Type     |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Magic Cookie                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Transaction ID (96 bits)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Fixed value in every RFC 5389 header
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Size of the fixed header
pub const HEADER_LEN: usize = 20;

/// Largest message accepted from a stream transport
pub const MAX_MESSAGE_LEN: usize = 2048;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_ERROR_CODE: u16 = 0x0009;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
// Pre-RFC 5389 servers use the comprehension-optional code point.
const ATTR_XOR_MAPPED_ADDRESS_ALT: u16 = 0x8020;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// 96-bit transaction identifier
pub type TransactionId = [u8; 12];

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StunError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("not a STUN message")]
    NotStun,

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("unsupported message type 0x{0:04x}")]
    UnknownMessageType(u16),

    #[error("malformed attribute 0x{0:04x}")]
    MalformedAttribute(u16),

    #[error("server returned error {code}: {reason}")]
    ErrorResponse { code: u16, reason: String },

    #[error("response carries no mapped address")]
    NoMappedAddress,
}

/// Binding message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    BindingRequest,
    BindingSuccess,
    BindingError,
}

impl MessageType {
    fn code(self) -> u16 {
        match self {
            MessageType::BindingRequest => 0x0001,
            MessageType::BindingSuccess => 0x0101,
            MessageType::BindingError => 0x0111,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(MessageType::BindingRequest),
            0x0101 => Some(MessageType::BindingSuccess),
            0x0111 => Some(MessageType::BindingError),
            _ => None,
        }
    }
}

/// Attributes this codec understands; everything else is kept opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    MappedAddress(SocketAddr),
    XorMappedAddress(SocketAddr),
    ErrorCode { code: u16, reason: String },
    Unknown { kind: u16, value: Vec<u8> },
}

/// A decoded STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub transaction_id: TransactionId,
    pub attributes: Vec<Attribute>,
}

impl Message {
    /// Binding request with a fresh random transaction id
    pub fn binding_request() -> Self {
        Self {
            message_type: MessageType::BindingRequest,
            transaction_id: rand::random(),
            attributes: Vec::new(),
        }
    }

    /// Binding success response reporting `mapped` (what a server sends)
    pub fn binding_success(transaction_id: TransactionId, mapped: SocketAddr) -> Self {
        Self {
            message_type: MessageType::BindingSuccess,
            transaction_id,
            attributes: vec![Attribute::XorMappedAddress(mapped)],
        }
    }

    /// The reflexive address reported by the server.
    ///
    /// XOR-MAPPED-ADDRESS wins over MAPPED-ADDRESS: NATs that rewrite
    /// addresses inside payloads cannot mangle the XOR form.
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        let xor = self.attributes.iter().find_map(|attr| match attr {
            Attribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        });

        xor.or_else(|| {
            self.attributes.iter().find_map(|attr| match attr {
                Attribute::MappedAddress(addr) => Some(*addr),
                _ => None,
            })
        })
    }

    /// Error code and reason of an error response
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::ErrorCode { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }

    /// Serialize to wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for attr in &self.attributes {
            let (kind, value) = match attr {
                Attribute::MappedAddress(addr) => (ATTR_MAPPED_ADDRESS, encode_address(*addr)),
                Attribute::XorMappedAddress(addr) => (
                    ATTR_XOR_MAPPED_ADDRESS,
                    encode_address(xor_address(*addr, &self.transaction_id)),
                ),
                Attribute::ErrorCode { code, reason } => {
                    let mut value = vec![0, 0, (code / 100) as u8 & 0x07, (code % 100) as u8];
                    value.extend_from_slice(reason.as_bytes());
                    (ATTR_ERROR_CODE, value)
                }
                Attribute::Unknown { kind, value } => (*kind, value.clone()),
            };

            body.extend_from_slice(&kind.to_be_bytes());
            body.extend_from_slice(&(value.len() as u16).to_be_bytes());
            body.extend_from_slice(&value);
            body.resize(padded(body.len()), 0);
        }

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&self.message_type.code().to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(&self.transaction_id);
        out.extend_from_slice(&body);
        out
    }

    /// Parse a complete message
    pub fn decode(buf: &[u8]) -> Result<Self, StunError> {
        let header: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(StunError::Truncated {
                needed: HEADER_LEN,
                available: buf.len(),
            })?;

        let body_len = body_length(header)?;
        let total = HEADER_LEN + body_len;
        if buf.len() < total {
            return Err(StunError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let code = u16::from_be_bytes([buf[0], buf[1]]);
        let message_type =
            MessageType::from_code(code).ok_or(StunError::UnknownMessageType(code))?;

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&buf[8..HEADER_LEN]);

        let mut attributes = Vec::new();
        let body = &buf[HEADER_LEN..total];
        let mut offset = 0;
        while offset < body.len() {
            let Some(attr_header) = body.get(offset..offset + 4) else {
                return Err(StunError::Truncated {
                    needed: HEADER_LEN + offset + 4,
                    available: total,
                });
            };
            let kind = u16::from_be_bytes([attr_header[0], attr_header[1]]);
            let len = u16::from_be_bytes([attr_header[2], attr_header[3]]) as usize;
            let value = body
                .get(offset + 4..offset + 4 + len)
                .ok_or(StunError::MalformedAttribute(kind))?;

            attributes.push(decode_attribute(kind, value, &transaction_id)?);
            offset += 4 + padded(len);
        }

        Ok(Self {
            message_type,
            transaction_id,
            attributes,
        })
    }
}

/// Validate a header and return the length of the body that follows it
pub fn body_length(header: &[u8; HEADER_LEN]) -> Result<usize, StunError> {
    if header[0] & 0xC0 != 0 {
        return Err(StunError::NotStun);
    }
    if u32::from_be_bytes([header[4], header[5], header[6], header[7]]) != MAGIC_COOKIE {
        return Err(StunError::NotStun);
    }

    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len % 4 != 0 {
        return Err(StunError::NotStun);
    }
    if HEADER_LEN + len > MAX_MESSAGE_LEN {
        return Err(StunError::TooLarge(HEADER_LEN + len));
    }

    Ok(len)
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn decode_attribute(
    kind: u16,
    value: &[u8],
    transaction_id: &TransactionId,
) -> Result<Attribute, StunError> {
    match kind {
        ATTR_MAPPED_ADDRESS => decode_address(kind, value).map(Attribute::MappedAddress),
        ATTR_XOR_MAPPED_ADDRESS | ATTR_XOR_MAPPED_ADDRESS_ALT => decode_address(kind, value)
            .map(|addr| Attribute::XorMappedAddress(xor_address(addr, transaction_id))),
        ATTR_ERROR_CODE => {
            if value.len() < 4 {
                return Err(StunError::MalformedAttribute(kind));
            }
            let code = u16::from(value[2] & 0x07) * 100 + u16::from(value[3]);
            let reason = String::from_utf8_lossy(&value[4..]).into_owned();
            Ok(Attribute::ErrorCode { code, reason })
        }
        _ => Ok(Attribute::Unknown {
            kind,
            value: value.to_vec(),
        }),
    }
}

fn decode_address(kind: u16, value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::MalformedAttribute(kind));
    }
    let port = u16::from_be_bytes([value[2], value[3]]);

    let ip = match (value[1], &value[4..]) {
        (FAMILY_IPV4, octets) if octets.len() == 4 => {
            IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        (FAMILY_IPV6, octets) if octets.len() == 16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(octets);
            IpAddr::V6(Ipv6Addr::from(raw))
        }
        _ => return Err(StunError::MalformedAttribute(kind)),
    };

    Ok(SocketAddr::new(ip, port))
}

fn encode_address(addr: SocketAddr) -> Vec<u8> {
    let mut value = vec![0];
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ip.octets());
        }
    }
    value
}

/// XOR an address with the cookie (and transaction id for IPv6).
/// The operation is its own inverse.
fn xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> SocketAddr {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    let ip = match addr.ip() {
        IpAddr::V4(ip) => {
            let mut octets = ip.octets();
            for (b, k) in octets.iter_mut().zip(cookie) {
                *b ^= k;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(ip) => {
            let mut octets = ip.octets();
            let key = cookie.iter().chain(transaction_id.iter());
            for (b, k) in octets.iter_mut().zip(key) {
                *b ^= k;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    SocketAddr::new(ip, port)
}
