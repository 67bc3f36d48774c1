//! Error types for connector and exchange operations.
//!
//! The split mirrors how failures are handled: a [`TransportError`] is a
//! delivery problem (the peer could not be reached, or the channel broke),
//! an [`ExchangeError`] adds what the peer said about the request.

use std::time::Duration;

use rangelink_core::{AddressParseError, PeerAddress};
use thiserror::Error;

/// One failed connection attempt against a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Candidate that failed.
    pub address: PeerAddress,
    /// What went wrong.
    pub reason: String,
}

/// Errors raised while delivering a message to a peer.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Every candidate address refused or timed out.
    #[error("peer '{peer}' unreachable: all {} candidate(s) failed", .failures.len())]
    AllTargetsUnreachable {
        /// Logical peer name.
        peer: String,
        /// One entry per candidate, in connection order.
        failures: Vec<CandidateFailure>,
    },

    /// The channel failed on a send. Eligible for one reconnect-and-resend.
    #[error("channel to {address} failed: {reason}")]
    ChannelClosed {
        /// Candidate the session was connected to.
        address: PeerAddress,
        /// Underlying I/O or HTTP error.
        reason: String,
    },

    /// The single resend after a reconnect failed, or the reconnect itself
    /// failed. Not retried further.
    #[error("resend to peer '{peer}' failed: {reason}")]
    ResendFailed {
        /// Logical peer name.
        peer: String,
        /// Why the resend cycle failed.
        reason: String,
    },

    /// A connect, send or caller deadline elapsed.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Which step timed out.
        operation: &'static str,
        /// Configured limit.
        after: Duration,
    },

    /// No URI was supplied for the call and the peer has no default.
    #[error("no request URI for peer '{peer}'")]
    MissingUri {
        /// Logical peer name.
        peer: String,
    },

    /// The request has an empty body.
    #[error("refusing to send empty content to peer '{peer}'")]
    EmptyContent {
        /// Logical peer name.
        peer: String,
    },

    /// The request could not be framed (bad URI or header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No session became available within the acquire timeout.
    #[error("session pool for peer '{peer}' exhausted after {after:?}")]
    PoolExhausted {
        /// Logical peer name.
        peer: String,
        /// Acquire timeout.
        after: Duration,
    },

    /// The connector configuration is unusable.
    #[error("invalid connector configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// True for failures caused by the channel itself, the only kind the
    /// connector answers with a reconnect-and-resend.
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, TransportError::ChannelClosed { .. })
    }
}

impl From<AddressParseError> for TransportError {
    fn from(err: AddressParseError) -> Self {
        TransportError::InvalidConfig(err.to_string())
    }
}

/// Errors surfaced by [`crate::MessageExchange`].
///
/// Each variant is a distinct operator action: a peer that is down, a
/// credential or trust problem, a request the peer refused, or a reply
/// nobody can read.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The message could not be delivered.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer answered 401. Never retried.
    #[error("authentication failed: {status} {reason}")]
    AuthenticationFailed {
        /// Status code (always 401).
        status: u16,
        /// Reason phrase from the status line.
        reason: String,
    },

    /// The peer answered with a non-200, non-401 status.
    #[error("request rejected: {code} {reason}")]
    RemoteRejected {
        /// Status code.
        code: u16,
        /// Reason phrase from the status line.
        reason: String,
    },

    /// The request could not be encoded, or a 200 reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}
