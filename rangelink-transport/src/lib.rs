//! # rangelink-transport
//!
//! Resilient delivery of opaque messages to a remote subsystem.
//!
//! This crate provides:
//! - **ConnectorTransport**: candidate failover, one reconnect-and-resend per
//!   call, a bounded session pool and explicit timeouts
//! - **MessageExchange**: codec-driven request/reply with distinct error
//!   kinds for unreachable peers, rejected credentials and refused requests
//! - **Wire framing**: HTTP/1.1 `POST` over any provider stream via hyper

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use rangelink_core::{
    AuditSink, JsonCodec, MessageCodec, NetworkProvider, PeerAddress, PeerAddressList, Providers,
    TokioProviders,
};

/// Connector and peer configuration.
pub mod config;

/// Connector transport state machine.
pub mod connector;

/// Error types for transport and exchange operations.
pub mod error;

/// Typed message exchange and reply classification.
pub mod exchange;

/// Sessions and the session pool.
pub mod session;

/// HTTP/1.1 framing.
pub mod wire;

pub use config::{ConnectorConfig, PeerDescriptor};
pub use connector::ConnectorTransport;
pub use error::{CandidateFailure, ExchangeError, TransportError};
pub use exchange::{MessageExchange, STATUS_OK, STATUS_UNAUTHORIZED};
pub use session::{PooledSession, Session, SessionPool, SessionState};
pub use wire::{CONNECTOR_METHOD, PkiMessage, PkiResponse};
