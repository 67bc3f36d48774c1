//! # rangelink
//!
//! Cluster-safe number allocation and resilient peer messaging for the
//! subsystems of a certificate authority.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              rangelink (this crate)                         │
//! │   Re-exports + cluster configuration + range-update tool    │
//! ├──────────────────────────┬──────────────────────────────────┤
//! │  rangelink-transport     │       rangelink-range            │
//! │  • Candidate failover    │       • RangeAllocator           │
//! │  • Reconnect and resend  │       • Conditional replace      │
//! │  • Bounded session pool  │       • In-memory / file stores  │
//! │  • MessageExchange       │                                  │
//! ├──────────────────────────┴──────────────────────────────────┤
//! │                     rangelink-core                          │
//! │  Provider traits: Time, Task, Network                       │
//! │  PeerAddressList, AuditSink, MessageCodec                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is wired explicitly: load a [`ClusterConfig`], then hand its
//! pieces to the constructors.
//!
//! ```ignore
//! use std::sync::Arc;
//! use rangelink::{ClusterConfig, FileRangeRepository, TokioTimeProvider, TracingAuditSink};
//!
//! let config = ClusterConfig::load("/etc/rangelink/cluster.json")?;
//! let repository = config.open_repository(None)?;
//! let allocator = config.allocator(repository, TokioTimeProvider::new(), Arc::new(TracingAuditSink))?;
//! let serial = allocator.allocate("serial").await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;

pub use config::{
    ClusterConfig, ConfigError, ConnectorEntry, CounterEntry, DatabaseConfig, REQUEST_COUNTER,
    RepositoryConfig, RetryConfig, SERIAL_COUNTER,
};

pub use rangelink_core::*;
pub use rangelink_range::*;
pub use rangelink_transport::{
    CONNECTOR_METHOD, CandidateFailure, ConnectorConfig, ConnectorTransport, ExchangeError,
    MessageExchange, PeerDescriptor, PkiMessage, PkiResponse, PooledSession, STATUS_OK,
    STATUS_UNAUTHORIZED, Session, SessionPool, SessionState, TransportError,
};
