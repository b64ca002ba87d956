//! `stun:` / `stuns:` URI parsing (RFC 7064, without query parameters)

use pubip_core::{Error, Result};
use std::fmt;

/// Default port for `stun:` URIs
pub const DEFAULT_PORT: u16 = 3478;

/// Default port for `stuns:` URIs
pub const DEFAULT_TLS_PORT: u16 = 5349;

/// A parsed STUN server URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunServer {
    /// Host name or address literal, without brackets
    pub host: String,
    pub port: u16,
    /// `stuns:` scheme
    pub secure: bool,
}

impl StunServer {
    /// Parse `stun:host[:port]` or `stuns:host[:port]`.
    /// IPv6 literals must be bracketed.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::config(format!("Invalid STUN URI '{}': {}", uri, reason));

        let (secure, rest) = if let Some(rest) = uri.strip_prefix("stuns:") {
            (true, rest)
        } else if let Some(rest) = uri.strip_prefix("stun:") {
            (false, rest)
        } else {
            return Err(invalid("scheme must be stun: or stuns:"));
        };

        let default_port = if secure { DEFAULT_TLS_PORT } else { DEFAULT_PORT };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match after {
                "" => default_port,
                _ => after
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| invalid("bad port"))?,
            };
            (host, port)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid("bad port"))?),
                None => (rest, default_port),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            secure,
        })
    }
}

impl fmt::Display for StunServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "stuns" } else { "stun" };
        if self.host.contains(':') {
            write!(f, "{}:[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}:{}:{}", scheme, self.host, self.port)
        }
    }
}
