//! # rangelink-core
//!
//! Core abstractions shared by the rangelink crates.
//!
//! - **Provider traits**: [`NetworkProvider`], [`TimeProvider`] and
//!   [`TaskProvider`], bundled by [`Providers`], so connectors run the same
//!   code against real sockets and the in-memory network used in tests
//! - **Peer addressing**: [`PeerAddressList`] turns a configured host
//!   descriptor into ordered connection candidates
//! - **Audit plumbing**: [`AuditEvent`] and the injected [`AuditSink`]
//! - **Codec seam**: [`MessageCodec`] for message bodies

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod address;
mod audit;
mod codec;
mod network;
mod providers;
mod task;
mod time;

pub use address::{AddressParseError, PeerAddress, PeerAddressList};
pub use audit::{
    AuditEvent, AuditEventKind, AuditSink, DiscardAuditSink, SYSTEM_ACTOR, TracingAuditSink,
};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use network::{NetworkProvider, TcpListenerTrait, TokioNetworkProvider, TokioTcpListener};
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
