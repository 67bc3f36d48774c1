//! Session state machine.
//!
//! A session owns at most one channel to one candidate of its peer. It moves
//! through these states:
//!
//! ```text
//! Idle -> Connecting -> Connected <-> Sending
//!                          |             |
//!                          v             v
//!                     Disconnected -> Connecting
//!                          |
//!                          v
//!                        Failed
//! ```
//!
//! A session in `Failed` has an unknown channel state (a timeout fired mid
//! exchange) and is never handed to another caller.

mod pool;

pub use pool::{PooledSession, SessionPool};

use std::fmt;
use std::sync::Arc;

use rangelink_core::{AuditEvent, AuditEventKind, AuditSink, PeerAddress, Providers, TimeProvider};

use crate::config::{ConnectorConfig, PeerDescriptor};
use crate::error::{CandidateFailure, TransportError};
use crate::wire::{self, Channel, PkiMessage, PkiResponse};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Never connected.
    Idle,
    /// Trying candidates.
    Connecting,
    /// Channel open and ready for a send.
    Connected,
    /// An exchange is in flight.
    Sending,
    /// The channel was lost or never came up. Reconnectable.
    Disconnected,
    /// Abandoned mid-operation. Must be discarded.
    Failed,
}

impl SessionState {
    /// States in which a session may go back to the pool.
    pub fn is_reusable(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Connected | SessionState::Disconnected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Sending => "sending",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Collaborators shared by every session of one connector.
pub(crate) struct SessionContext<P: Providers> {
    pub(crate) peer: PeerDescriptor,
    pub(crate) config: ConnectorConfig,
    pub(crate) providers: P,
    pub(crate) audit: Arc<dyn AuditSink>,
}

impl<P: Providers> SessionContext<P> {
    fn audit_event(&self, kind: AuditEventKind, address: &PeerAddress, detail: String) {
        self.audit.emit(
            AuditEvent::system(kind, self.config.local_address.clone(), detail)
                .with_peer(address.host.clone(), Some(address.port)),
        );
    }
}

/// A connection to one candidate of a peer.
pub struct Session<P: Providers> {
    id: u64,
    ctx: Arc<SessionContext<P>>,
    state: SessionState,
    channel: Option<Channel>,
    active: Option<usize>,
}

impl<P: Providers> Session<P> {
    pub(crate) fn new(id: u64, ctx: Arc<SessionContext<P>>) -> Self {
        Self {
            id,
            ctx,
            state: SessionState::Idle,
            channel: None,
            active: None,
        }
    }

    /// Pool-local identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Index of the candidate the channel is open to.
    pub fn active_candidate_index(&self) -> Option<usize> {
        self.active
    }

    /// Candidate the channel is open to.
    pub fn active_candidate(&self) -> Option<&PeerAddress> {
        self.active.and_then(|i| self.ctx.peer.targets.get(i))
    }

    /// True while a channel is believed usable.
    ///
    /// Only the session's own bookkeeping counts; a channel closed by the
    /// peer is discovered by the next send.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.channel.is_some()
    }

    /// Move the channel and state into a new value, leaving this one `Failed`.
    pub(crate) fn detach(&mut self) -> Session<P> {
        let state = std::mem::replace(&mut self.state, SessionState::Failed);
        Session {
            id: self.id,
            ctx: Arc::clone(&self.ctx),
            state,
            channel: self.channel.take(),
            active: self.active.take(),
        }
    }

    /// Drop the channel and mark the session `Failed`.
    pub(crate) fn fail(&mut self) {
        self.channel = None;
        self.active = None;
        self.state = SessionState::Failed;
    }

    /// Run target selection from the first candidate.
    ///
    /// Each candidate gets `connect_timeout` to complete the handshake; the
    /// first one that does becomes active and the rest are not tried. Every
    /// failed candidate emits one `connect-failure` audit event.
    pub(crate) async fn connect(&mut self) -> Result<(), TransportError> {
        self.channel = None;
        self.active = None;
        self.state = SessionState::Connecting;

        let ctx = Arc::clone(&self.ctx);
        let timeout = ctx.config.connect_timeout;
        let mut failures = Vec::new();

        for (index, candidate) in ctx.peer.targets.candidates().iter().enumerate() {
            let attempt = ctx
                .providers
                .time()
                .timeout(timeout, wire::open_channel(&ctx.providers, candidate))
                .await;

            let reason = match attempt {
                Ok(Ok(channel)) => {
                    self.channel = Some(channel);
                    self.active = Some(index);
                    self.state = SessionState::Connected;
                    tracing::debug!(
                        peer = %ctx.peer.name,
                        candidate = %candidate,
                        session = self.id,
                        "session connected"
                    );
                    ctx.audit_event(
                        AuditEventKind::SessionEstablished,
                        candidate,
                        format!("session {} established", self.id),
                    );
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {timeout:?}"),
            };

            tracing::warn!(
                peer = %ctx.peer.name,
                candidate = %candidate,
                error = %reason,
                "failed to connect to candidate"
            );
            ctx.audit_event(
                AuditEventKind::ConnectFailure,
                candidate,
                format!("connect:{reason}"),
            );
            failures.push(CandidateFailure {
                address: candidate.clone(),
                reason,
            });
        }

        self.state = SessionState::Disconnected;
        Err(TransportError::AllTargetsUnreachable {
            peer: ctx.peer.name.clone(),
            failures,
        })
    }

    /// Send one message and wait up to `send_timeout` for the reply.
    ///
    /// A channel error leaves the session `Disconnected` and is reported as
    /// [`TransportError::ChannelClosed`]. A timeout leaves it `Failed`.
    pub(crate) async fn send(&mut self, message: &PkiMessage) -> Result<PkiResponse, TransportError> {
        let ctx = Arc::clone(&self.ctx);
        let (Some(index), Some(mut channel)) = (self.active, self.channel.take()) else {
            return Err(TransportError::InvalidRequest(
                "send on a session that is not connected".to_string(),
            ));
        };
        let address = match ctx.peer.targets.get(index) {
            Some(address) => address.clone(),
            None => {
                self.fail();
                return Err(TransportError::InvalidConfig(format!(
                    "candidate index {index} out of range"
                )));
            }
        };
        let request = match message.to_request(&address) {
            Ok(request) => request,
            Err(e) => {
                self.channel = Some(channel);
                return Err(e);
            }
        };

        self.state = SessionState::Sending;
        let timeout = ctx.config.send_timeout;
        match ctx.providers.time().timeout(timeout, channel.round_trip(request)).await {
            Ok(Ok(response)) => {
                self.channel = Some(channel);
                self.state = SessionState::Connected;
                Ok(response)
            }
            Ok(Err(e)) => {
                drop(channel);
                self.active = None;
                self.state = SessionState::Disconnected;
                tracing::warn!(
                    peer = %ctx.peer.name,
                    candidate = %address,
                    session = self.id,
                    error = %e,
                    "send failed"
                );
                ctx.audit_event(AuditEventKind::SendFailure, &address, format!("send:{e}"));
                Err(TransportError::ChannelClosed {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                drop(channel);
                self.fail();
                tracing::warn!(
                    peer = %ctx.peer.name,
                    candidate = %address,
                    session = self.id,
                    "send timed out; discarding session"
                );
                ctx.audit_event(
                    AuditEventKind::SendFailure,
                    &address,
                    format!("send:timed out after {timeout:?}"),
                );
                Err(TransportError::Timeout {
                    operation: "send",
                    after: timeout,
                })
            }
        }
    }
}

impl<P: Providers> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.ctx.peer.name)
            .field("state", &self.state)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reusable_states() {
        assert!(SessionState::Idle.is_reusable());
        assert!(SessionState::Connected.is_reusable());
        assert!(SessionState::Disconnected.is_reusable());
        assert!(!SessionState::Connecting.is_reusable());
        assert!(!SessionState::Sending.is_reusable());
        assert!(!SessionState::Failed.is_reusable());
    }
}
