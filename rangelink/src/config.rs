//! Cluster configuration file.
//!
//! One JSON document describes everything an instance needs: the range
//! records it extends, how hard to retry the store, where the store lives
//! and which peers it talks to.
//!
//! ```json
//! {
//!   "local_address": "ca1.example.com",
//!   "database": {
//!     "base_dn": "o=pki-tomcat-CA",
//!     "serial": { "rdn": "ou=certificateRepository,ou=ca", "range_width": 10000000 },
//!     "request": { "rdn": "ou=requests,ou=ca", "range_width": 10000000, "low_water_mark": 2000000 }
//!   },
//!   "retry": { "max_attempts": 5, "initial_backoff_ms": 100, "max_backoff_ms": 5000 },
//!   "repository": { "path": "/var/lib/pki/ranges.json" },
//!   "connectors": {
//!     "KRA": { "host": "kra1.example.com:8443 kra2.example.com:8443", "uri": "/kra/agent/kra/connector" }
//!   }
//! }
//! ```
//!
//! Everything is checked by [`ClusterConfig::load`], so a malformed peer
//! list or a zero range width stops startup instead of the first send.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rangelink_core::{AddressParseError, AuditSink, Providers, TimeProvider};
use rangelink_range::{
    CounterConfig, ExtensionRetry, FileRangeRepository, RangeAllocator, RangeError,
    RangeRepository, RecordDn, RepositoryError,
};
use rangelink_transport::{ConnectorConfig, ConnectorTransport, PeerDescriptor, TransportError};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Counter name of the certificate serial number range.
pub const SERIAL_COUNTER: &str = "serial";

/// Counter name of the request number range.
pub const REQUEST_COUNTER: &str = "request";

/// Errors found while loading or applying a [`ClusterConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid configuration JSON.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A connector's host list is malformed.
    #[error("connector '{name}': {source}")]
    InvalidPeer {
        /// Logical peer name.
        name: String,
        /// Parse failure.
        #[source]
        source: AddressParseError,
    },

    /// A connector's timeouts or pool bounds are unusable.
    #[error("connector '{name}': {source}")]
    InvalidConnector {
        /// Logical peer name.
        name: String,
        /// Validation failure.
        #[source]
        source: TransportError,
    },

    /// No connector with that name is configured.
    #[error("no connector named '{0}'")]
    UnknownConnector(String),

    /// A counter definition is unusable.
    #[error("counter '{counter}': {reason}")]
    InvalidCounter {
        /// Counter name.
        counter: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Retry settings are unusable.
    #[error("retry: {0}")]
    InvalidRetry(String),
}

/// Top-level configuration of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Address reported in audit events.
    #[serde(default = "default_local_address")]
    pub local_address: String,

    /// Range records.
    pub database: DatabaseConfig,

    /// Extension retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Location of the range store.
    pub repository: RepositoryConfig,

    /// Peers by logical name.
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorEntry>,
}

fn default_local_address() -> String {
    "localhost".to_string()
}

/// Where the counters' records live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Suffix appended to every record's relative name.
    pub base_dn: String,
    /// Serial number counter.
    pub serial: CounterEntry,
    /// Request number counter.
    pub request: CounterEntry,
}

/// One counter as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterEntry {
    /// Relative name of the record holding `nextRange`.
    pub rdn: String,
    /// Values claimed per automatic extension.
    pub range_width: u128,
    /// Remaining capacity that triggers an extension. Defaults to a fifth
    /// of the width.
    #[serde(default)]
    pub low_water_mark: Option<u128>,
    /// First value of the range owned at startup.
    #[serde(default)]
    pub begin: Option<u128>,
    /// Last value of the range owned at startup.
    #[serde(default)]
    pub end: Option<u128>,
    /// Advance of a manual bump. Defaults to the width.
    #[serde(default)]
    pub manual_increment: Option<u128>,
    /// Pointer value assumed while the record has none. Must match on every
    /// member and lie past every member's `end`.
    #[serde(default)]
    pub origin: Option<u128>,
}

/// Extension retry policy as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Failed attempts before an extension gives up.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff_ms: u64,
    /// Cap on the doubled delay.
    pub max_backoff_ms: u64,
    /// Consecutive lost races before an extension gives up.
    pub max_conflicts: u32,
    /// Limit on each store operation.
    pub operation_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let retry = ExtensionRetry::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_backoff_ms: duration_ms(retry.initial_backoff),
            max_backoff_ms: duration_ms(retry.max_backoff),
            max_conflicts: retry.max_conflicts,
            operation_timeout_ms: duration_ms(retry.operation_timeout),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The file-backed range store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Path of the store document.
    pub path: PathBuf,
}

/// One peer as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorEntry {
    /// A single host, or space separated `host:port` pairs.
    pub host: String,
    /// Port used with a single bare host.
    #[serde(default)]
    pub port: u16,
    /// Default request URI.
    #[serde(default)]
    pub uri: Option<String>,
    /// Request content type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Per-candidate connect limit.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Round-trip limit.
    #[serde(default)]
    pub send_timeout_secs: Option<u64>,
    /// Sessions opened at startup.
    #[serde(default)]
    pub min_sessions: Option<usize>,
    /// Concurrent session bound.
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

impl ClusterConfig {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; see [`ConfigError`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        tracing::debug!(
            path = %path.display(),
            connectors = config.connectors.len(),
            "loaded cluster configuration"
        );
        Ok(config)
    }

    /// Parse and validate a configuration document.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; see [`ConfigError`].
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; see [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.counters()?;
        self.extension_retry()?;
        for name in self.connectors.keys() {
            self.connector_settings(name)?;
        }
        Ok(())
    }

    /// Counter configurations for the serial and request counters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCounter`] for a zero width or
    /// increment, or a half-specified or inverted initial range.
    pub fn counters(&self) -> Result<Vec<CounterConfig>, ConfigError> {
        let base_dn = &self.database.base_dn;
        Ok(vec![
            self.database.serial.to_counter(SERIAL_COUNTER, base_dn)?,
            self.database.request.to_counter(REQUEST_COUNTER, base_dn)?,
        ])
    }

    /// Retry policy for range extensions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetry`] for a zero attempt or conflict
    /// budget, or a zero operation timeout.
    pub fn extension_retry(&self) -> Result<ExtensionRetry, ConfigError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.max_conflicts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_conflicts must be at least 1".to_string(),
            ));
        }
        if retry.operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidRetry(
                "operation_timeout_ms must be non-zero".to_string(),
            ));
        }
        let initial = Duration::from_millis(retry.initial_backoff_ms);
        let max = Duration::from_millis(retry.max_backoff_ms.max(retry.initial_backoff_ms));
        let mut extension = ExtensionRetry::default()
            .with_max_attempts(retry.max_attempts)
            .with_max_conflicts(retry.max_conflicts)
            .with_backoff(initial, max);
        extension.operation_timeout = Duration::from_millis(retry.operation_timeout_ms);
        Ok(extension)
    }

    /// Peer descriptor and connector settings for the peer `name`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownConnector`] if no such peer is configured
    /// - [`ConfigError::InvalidPeer`] for a malformed host list
    /// - [`ConfigError::InvalidConnector`] for unusable timeouts or pool bounds
    pub fn connector_settings(
        &self,
        name: &str,
    ) -> Result<(PeerDescriptor, ConnectorConfig), ConfigError> {
        let entry = self
            .connectors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownConnector(name.to_string()))?;

        let mut peer = PeerDescriptor::parse(name, &entry.host, entry.port).map_err(|source| {
            ConfigError::InvalidPeer {
                name: name.to_string(),
                source,
            }
        })?;
        if let Some(uri) = &entry.uri {
            peer = peer.with_uri(uri);
        }
        if let Some(content_type) = &entry.content_type {
            peer = peer.with_content_type(content_type);
        }

        let mut config = ConnectorConfig::default().with_local_address(&self.local_address);
        if let Some(secs) = entry.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = entry.send_timeout_secs {
            config.send_timeout = Duration::from_secs(secs);
        }
        if let Some(min) = entry.min_sessions {
            config.min_sessions = min;
        }
        if let Some(max) = entry.max_sessions {
            config.max_sessions = max;
        }
        config
            .validate()
            .map_err(|source| ConfigError::InvalidConnector {
                name: name.to_string(),
                source,
            })?;
        Ok((peer, config))
    }

    /// Bind to the configured file store.
    ///
    /// # Errors
    ///
    /// See [`FileRangeRepository::open`].
    pub fn open_repository(
        &self,
        credential: Option<&SecretString>,
    ) -> Result<FileRangeRepository, RepositoryError> {
        FileRangeRepository::open(&self.repository.path, credential)
    }

    /// Build the allocator for both counters on `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::InvalidConfig`] if the counters or retry policy
    /// are unusable.
    pub fn allocator<T: TimeProvider, R: RangeRepository>(
        &self,
        repository: R,
        time: T,
        audit: Arc<dyn AuditSink>,
    ) -> Result<RangeAllocator<T, R>, RangeError> {
        let counters = self
            .counters()
            .map_err(|e| RangeError::InvalidConfig(e.to_string()))?;
        let retry = self
            .extension_retry()
            .map_err(|e| RangeError::InvalidConfig(e.to_string()))?;
        Ok(RangeAllocator::new(counters, repository, time, retry, audit)?
            .with_local_address(&self.local_address))
    }

    /// Start a connector to the peer `name`, opening its minimum sessions.
    ///
    /// # Errors
    ///
    /// As for [`connector_settings`](ClusterConfig::connector_settings).
    pub async fn start_connector<P: Providers>(
        &self,
        name: &str,
        providers: P,
        audit: Arc<dyn AuditSink>,
    ) -> Result<ConnectorTransport<P>, ConfigError> {
        let (peer, config) = self.connector_settings(name)?;
        ConnectorTransport::start(peer, config, providers, audit)
            .await
            .map_err(|source| ConfigError::InvalidConnector {
                name: name.to_string(),
                source,
            })
    }
}

impl CounterEntry {
    fn to_counter(&self, name: &'static str, base_dn: &str) -> Result<CounterConfig, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidCounter {
            counter: name,
            reason: reason.to_string(),
        };
        if self.range_width == 0 {
            return Err(invalid("range_width must be non-zero"));
        }
        if self.manual_increment == Some(0) {
            return Err(invalid("manual_increment must be non-zero"));
        }

        let mut counter =
            CounterConfig::new(name, RecordDn::compose(&self.rdn, base_dn), self.range_width);
        if let Some(origin) = self.origin {
            counter = counter.with_origin(origin);
        }
        match (self.begin, self.end) {
            (Some(begin), Some(end)) if end < begin => {
                return Err(invalid("end is before begin"));
            }
            (Some(_), Some(end)) if end >= counter.origin => {
                return Err(invalid("end must be before origin"));
            }
            (Some(begin), Some(end)) => counter = counter.with_initial_range(begin, end),
            (None, None) => {}
            _ => return Err(invalid("begin and end must be given together")),
        }
        if let Some(low_water_mark) = self.low_water_mark {
            counter = counter.with_low_water_mark(low_water_mark);
        }
        if let Some(increment) = self.manual_increment {
            counter = counter.with_manual_increment(increment);
        }
        Ok(counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "database": {
            "base_dn": "o=ca",
            "serial": { "rdn": "ou=certificateRepository,ou=ca", "range_width": 1000 },
            "request": { "rdn": "ou=requests,ou=ca", "range_width": 500, "begin": 1, "end": 100, "origin": 101 }
        },
        "repository": { "path": "ranges.json" }
    }"#;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::from_json(MINIMAL).expect("valid");
        assert_eq!(config.local_address, "localhost");
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.connectors.is_empty());

        let counters = config.counters().expect("counters");
        assert_eq!(counters[0].name, SERIAL_COUNTER);
        assert_eq!(
            counters[0].record.as_str(),
            "ou=certificateRepository,ou=ca,o=ca"
        );
        assert_eq!(counters[1].initial_range, Some((1, 100)));
        assert_eq!(counters[1].origin, 101);
    }

    #[test]
    fn test_retry_defaults_match_allocator() {
        let config = ClusterConfig::from_json(MINIMAL).expect("valid");
        assert_eq!(
            config.extension_retry().expect("retry"),
            ExtensionRetry::default()
        );
    }

    #[test]
    fn test_initial_range_needs_origin_past_it() {
        let without_origin = MINIMAL.replace(r#", "origin": 101"#, "");
        assert!(matches!(
            ClusterConfig::from_json(&without_origin),
            Err(ConfigError::InvalidCounter {
                counter: REQUEST_COUNTER,
                ..
            })
        ));

        let inside = MINIMAL.replace(r#""origin": 101"#, r#""origin": 50"#);
        assert!(matches!(
            ClusterConfig::from_json(&inside),
            Err(ConfigError::InvalidCounter {
                counter: REQUEST_COUNTER,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_conflict_budget_rejected() {
        let mut config = ClusterConfig::from_json(MINIMAL).expect("valid");
        config.retry.max_conflicts = 0;
        assert!(matches!(
            config.extension_retry(),
            Err(ConfigError::InvalidRetry(_))
        ));
    }
}
