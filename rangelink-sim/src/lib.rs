//! # rangelink-sim
//!
//! Test doubles for the provider and audit seams.
//!
//! - [`SimNetworkProvider`]: an in-memory network of duplex streams. Unbound
//!   addresses refuse connections, black-holed addresses never answer, and
//!   every connect attempt is counted per address
//! - [`SimProviders`]: the bundle handed to connectors under test
//! - [`CapturingAuditSink`]: records every audit event for assertions
//!
//! ```rust,ignore
//! use rangelink_sim::{CapturingAuditSink, SimProviders};
//!
//! let providers = SimProviders::new();
//! let listener = providers.network().bind("kra2:8443").await?;
//! // hand `providers` and an `Arc<CapturingAuditSink>` to a connector
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod audit;
mod network;
mod providers;

pub use audit::CapturingAuditSink;
pub use network::{SimNetworkProvider, SimTcpListener};
pub use providers::SimProviders;

pub use rangelink_core::{NetworkProvider, Providers, TcpListenerTrait};
