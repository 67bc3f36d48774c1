//! Peer address resolution.
//!
//! A remote subsystem is configured with a host descriptor that is either a
//! single hostname (paired with a separately configured port) or a
//! space-separated list of `host:port` pairs naming replicas of the same
//! logical peer:
//!
//! ```text
//! kra.example.com                                   + port 8443
//! kra1.example.com:8443 kra2.example.com:8443
//! [2001:db8::10]:8443 kra2.example.com:8443
//! ```
//!
//! Parsing happens once, when the connector is configured, so a malformed
//! entry is a startup error rather than a send-time surprise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One candidate address of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Hostname or IP literal (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl PeerAddress {
    /// Create a candidate address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single `host:port` entry.
    ///
    /// Supports IPv6 bracket notation (`[::1]:8443`).
    ///
    /// # Errors
    ///
    /// Returns an error if the port is missing or cannot be parsed, or if
    /// the host part is empty.
    pub fn parse(entry: &str) -> Result<Self, AddressParseError> {
        let (host, port) = if let Some(rest) = entry.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AddressParseError::InvalidHost(entry.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| AddressParseError::MissingPort(entry.to_string()))?;
            (host, port)
        } else {
            entry
                .rsplit_once(':')
                .ok_or_else(|| AddressParseError::MissingPort(entry.to_string()))?
        };

        if host.is_empty() {
            return Err(AddressParseError::InvalidHost(entry.to_string()));
        }
        let port = parse_port(port).ok_or_else(|| AddressParseError::InvalidPort(entry.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ordered candidate addresses of one logical peer.
///
/// Order matters: the connector tries candidates front to back and keeps
/// the first one that accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddressList {
    candidates: Vec<PeerAddress>,
}

impl PeerAddressList {
    /// Resolve a configured host descriptor into candidates.
    ///
    /// A descriptor without whitespace is a single host. If it carries its
    /// own `:port` suffix that port wins, otherwise `default_port` is used.
    /// A descriptor with whitespace is a list where every entry must be a
    /// `host:port` pair; the default port is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty descriptor, a list entry without a
    /// port, or an unparsable port.
    pub fn parse(target: &str, default_port: u16) -> Result<Self, AddressParseError> {
        let entries: Vec<&str> = target.split_whitespace().collect();
        match entries.as_slice() {
            [] => Err(AddressParseError::Empty),
            [single] => {
                let candidate = if looks_like_pair(single) {
                    PeerAddress::parse(single)?
                } else if default_port == 0 {
                    return Err(AddressParseError::InvalidPort(single.to_string()));
                } else {
                    let host = single.trim_start_matches('[').trim_end_matches(']');
                    PeerAddress::new(host, default_port)
                };
                Ok(Self {
                    candidates: vec![candidate],
                })
            }
            many => {
                let candidates = many
                    .iter()
                    .map(|entry| PeerAddress::parse(entry))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self { candidates })
            }
        }
    }

    /// Build a list from already-resolved candidates.
    ///
    /// # Errors
    ///
    /// Returns [`AddressParseError::Empty`] if `candidates` is empty.
    pub fn from_candidates(candidates: Vec<PeerAddress>) -> Result<Self, AddressParseError> {
        if candidates.is_empty() {
            return Err(AddressParseError::Empty);
        }
        Ok(Self { candidates })
    }

    /// Candidates in connection order.
    pub fn candidates(&self) -> &[PeerAddress] {
        &self.candidates
    }

    /// Candidate at `index`.
    pub fn get(&self, index: usize) -> Option<&PeerAddress> {
        self.candidates.get(index)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Always false for a successfully parsed list.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl fmt::Display for PeerAddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for candidate in &self.candidates {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{candidate}")?;
            first = false;
        }
        Ok(())
    }
}

/// Error parsing a peer host descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// The descriptor contained no hosts.
    #[error("peer target is empty")]
    Empty,
    /// A `host:port` entry has no port.
    #[error("missing port in peer target entry '{0}'")]
    MissingPort(String),
    /// The port is not a number in 1..=65535.
    #[error("invalid port in peer target entry '{0}'")]
    InvalidPort(String),
    /// The host part is empty or badly bracketed.
    #[error("invalid host in peer target entry '{0}'")]
    InvalidHost(String),
}

fn parse_port(s: &str) -> Option<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// A lone entry is only treated as `host:port` when it ends in digits after
/// a single colon (or a bracketed IPv6 host); a bare IPv6 literal is a host.
fn looks_like_pair(entry: &str) -> bool {
    if entry.starts_with('[') {
        return entry.contains("]:");
    }
    match entry.split_once(':') {
        Some((_, port)) => !port.contains(':'),
        None => false,
    }
}
