//! Connector configuration.

use std::time::Duration;

use rangelink_core::{AddressParseError, PeerAddressList};

use crate::error::TransportError;

/// Static routing configuration for one remote subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// Logical name, e.g. `KRA` or `TKS`.
    pub name: String,

    /// Ordered connection candidates.
    pub targets: PeerAddressList,

    /// Default request URI. A call may override it.
    pub uri: Option<String>,

    /// Content type sent with every request. Falls back to the codec's.
    pub content_type: Option<String>,
}

impl PeerDescriptor {
    /// Describe a peer from its configured host descriptor and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the host descriptor is malformed.
    pub fn parse(
        name: impl Into<String>,
        host: &str,
        port: u16,
    ) -> Result<Self, AddressParseError> {
        Ok(Self {
            name: name.into(),
            targets: PeerAddressList::parse(host, port)?,
            uri: None,
            content_type: None,
        })
    }

    /// Set the default request URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the request content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Timeouts and pool sizing for a connector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Per-candidate limit on the transport handshake.
    pub connect_timeout: Duration,

    /// Limit on one request/response round trip.
    pub send_timeout: Duration,

    /// Sessions opened eagerly by `warm_up`.
    pub min_sessions: usize,

    /// Upper bound on concurrently leased sessions.
    pub max_sessions: usize,

    /// How long a caller waits for a free session.
    pub acquire_timeout: Duration,

    /// Address of this instance, reported in audit events.
    pub local_address: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            min_sessions: 3,
            max_sessions: 15,
            acquire_timeout: Duration::from_secs(30),
            local_address: "localhost".to_string(),
        }
    }
}

impl ConnectorConfig {
    /// Configuration for low-latency local networking, used by tests.
    pub fn local_network() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_secs(2),
            min_sessions: 1,
            max_sessions: 4,
            acquire_timeout: Duration::from_secs(2),
            local_address: "127.0.0.1".to_string(),
        }
    }

    /// Set the connect and send timeouts.
    pub fn with_timeouts(mut self, connect: Duration, send: Duration) -> Self {
        self.connect_timeout = connect;
        self.send_timeout = send;
        self
    }

    /// Set the pool bounds.
    pub fn with_pool(mut self, min_sessions: usize, max_sessions: usize) -> Self {
        self.min_sessions = min_sessions;
        self.max_sessions = max_sessions;
        self
    }

    /// Set the address reported in audit events.
    pub fn with_local_address(mut self, local_address: impl Into<String>) -> Self {
        self.local_address = local_address.into();
        self
    }

    /// Check the configuration for values the connector cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] for a zero pool or timeout,
    /// or `min_sessions > max_sessions`.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_sessions == 0 {
            return Err(TransportError::InvalidConfig(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.min_sessions > self.max_sessions {
            return Err(TransportError::InvalidConfig(format!(
                "min_sessions ({}) exceeds max_sessions ({})",
                self.min_sessions, self.max_sessions
            )));
        }
        if self.connect_timeout.is_zero() || self.send_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "connect and send timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_connection_module() {
        let config = ConnectorConfig::default();
        assert_eq!(config.min_sessions, 3);
        assert_eq!(config.max_sessions, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_pool() {
        let config = ConnectorConfig::default().with_pool(5, 2);
        assert!(matches!(
            config.validate(),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_descriptor_parse_multi_target() {
        let peer = PeerDescriptor::parse("KRA", "kra1:8443 kra2:8443", 443)
            .expect("parse")
            .with_uri("/kra/agent/kra/connector");
        assert_eq!(peer.targets.len(), 2);
        assert_eq!(peer.uri.as_deref(), Some("/kra/agent/kra/connector"));
    }
}
