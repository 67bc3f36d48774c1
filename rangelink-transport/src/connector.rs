//! Connector transport: failover and the single reconnect-and-resend.
//!
//! One [`ConnectorTransport`] talks to one logical peer. Each call leases a
//! session from the pool and walks a small state machine:
//!
//! ```text
//! Connect ----------------------> Send { retry_allowed: false }
//! Send { retry_allowed: true } --channel failure--> Reconnect --> Resend
//! ```
//!
//! A call gets at most one reconnect. A session that had to be opened at the
//! start of the call already spent it, so a channel failure on a fresh
//! session is final. Whatever the outcome the lease goes back to the pool
//! when the call returns, or is discarded if the session state is unknown.

use std::sync::Arc;
use std::time::Duration;

use rangelink_core::{AuditSink, Providers, TimeProvider};

use crate::config::{ConnectorConfig, PeerDescriptor};
use crate::error::TransportError;
use crate::session::{PooledSession, SessionContext, SessionPool};
use crate::wire::{PkiMessage, PkiResponse};

/// Steps of one delivery attempt.
#[derive(Debug)]
enum Phase {
    /// The leased session has no channel; run target selection.
    Connect,
    /// Transmit on the current channel.
    Send { retry_allowed: bool },
    /// The channel broke on its first use in this call.
    Reconnect { cause: TransportError },
    /// Transmit once more on the new channel.
    Resend,
}

/// Delivers framed messages to one peer through a bounded session pool.
pub struct ConnectorTransport<P: Providers> {
    ctx: Arc<SessionContext<P>>,
    pool: SessionPool<P>,
}

impl<P: Providers> ConnectorTransport<P> {
    /// Create a connector. No connection is opened until [`warm_up`] or the
    /// first send.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if the configuration is
    /// unusable.
    ///
    /// [`warm_up`]: ConnectorTransport::warm_up
    pub fn new(
        peer: PeerDescriptor,
        config: ConnectorConfig,
        providers: P,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        if peer.targets.is_empty() {
            return Err(TransportError::InvalidConfig(format!(
                "peer '{}' has no candidate addresses",
                peer.name
            )));
        }

        let ctx = Arc::new(SessionContext {
            peer,
            config,
            providers,
            audit,
        });
        let pool = SessionPool::new(Arc::clone(&ctx));
        Ok(Self { ctx, pool })
    }

    /// Create a connector and eagerly open `min_sessions` sessions.
    ///
    /// A peer that is down at this point is not an error: the failure is
    /// logged and sessions connect lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if the configuration is
    /// unusable.
    pub async fn start(
        peer: PeerDescriptor,
        config: ConnectorConfig,
        providers: P,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, TransportError> {
        let connector = Self::new(peer, config, providers, audit)?;
        let opened = connector.warm_up().await;
        tracing::info!(
            peer = %connector.peer().name,
            opened,
            wanted = connector.config().min_sessions,
            "connector started"
        );
        Ok(connector)
    }

    /// Open up to `min_sessions` sessions and park them in the pool.
    ///
    /// Returns how many connected.
    pub async fn warm_up(&self) -> usize {
        let wanted = self.ctx.config.min_sessions;
        let mut leases = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            match self.pool.acquire().await {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    tracing::warn!(peer = %self.ctx.peer.name, error = %e, "cannot lease session for warm-up");
                    break;
                }
            }
        }

        let mut opened = 0;
        for lease in &mut leases {
            if lease.is_connected() {
                opened += 1;
                continue;
            }
            match lease.connect().await {
                Ok(()) => opened += 1,
                Err(e) => {
                    tracing::warn!(
                        peer = %self.ctx.peer.name,
                        error = %e,
                        "failed to connect at startup, peer probably down, will retry on send"
                    );
                    break;
                }
            }
        }
        opened
    }

    /// Peer this connector delivers to.
    pub fn peer(&self) -> &PeerDescriptor {
        &self.ctx.peer
    }

    /// Active configuration.
    pub fn config(&self) -> &ConnectorConfig {
        &self.ctx.config
    }

    /// Runtime providers the connector was built with.
    pub fn providers(&self) -> &P {
        &self.ctx.providers
    }

    /// The session pool, for inspection.
    pub fn pool(&self) -> &SessionPool<P> {
        &self.pool
    }

    /// Deliver `message` and return the peer's reply, unclassified.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AllTargetsUnreachable`] if no candidate accepts
    /// - [`TransportError::ResendFailed`] if the one reconnect-and-resend
    ///   did not get a reply
    /// - [`TransportError::Timeout`] if the send timeout elapsed; the
    ///   session is discarded
    /// - [`TransportError::PoolExhausted`] if no session frees up in time
    pub async fn send(&self, message: &PkiMessage) -> Result<PkiResponse, TransportError> {
        if message.body.is_empty() {
            return Err(TransportError::EmptyContent {
                peer: self.ctx.peer.name.clone(),
            });
        }

        let mut lease = self.pool.acquire().await?;
        tracing::debug!(
            peer = %self.ctx.peer.name,
            uri = %message.uri,
            session = lease.id(),
            "sending request"
        );
        self.deliver(&mut lease, message).await
    }

    /// Like [`send`](ConnectorTransport::send) with an overall deadline.
    ///
    /// When the deadline fires the in-flight connect or send is abandoned
    /// and its session discarded rather than returned to the pool.
    ///
    /// # Errors
    ///
    /// As for `send`, plus [`TransportError::Timeout`] for the deadline.
    pub async fn send_with_timeout(
        &self,
        message: &PkiMessage,
        deadline: Duration,
    ) -> Result<PkiResponse, TransportError> {
        match self
            .ctx
            .providers
            .time()
            .timeout(deadline, self.send(message))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(peer = %self.ctx.peer.name, ?deadline, "caller deadline elapsed");
                Err(TransportError::Timeout {
                    operation: "call",
                    after: deadline,
                })
            }
        }
    }

    async fn deliver(
        &self,
        session: &mut PooledSession<P>,
        message: &PkiMessage,
    ) -> Result<PkiResponse, TransportError> {
        let peer = &self.ctx.peer.name;
        let mut phase = if session.is_connected() {
            Phase::Send {
                retry_allowed: true,
            }
        } else {
            Phase::Connect
        };

        loop {
            phase = match phase {
                Phase::Connect => {
                    session.connect().await?;
                    Phase::Send {
                        retry_allowed: false,
                    }
                }
                Phase::Send { retry_allowed } => match session.send(message).await {
                    Ok(response) => return Ok(response),
                    Err(e) if e.is_channel_failure() && retry_allowed => {
                        Phase::Reconnect { cause: e }
                    }
                    Err(e) if e.is_channel_failure() => {
                        return Err(TransportError::ResendFailed {
                            peer: peer.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                },
                Phase::Reconnect { cause } => {
                    tracing::warn!(peer = %peer, error = %cause, "channel lost, trying a reconnect");
                    if let Err(e) = session.connect().await {
                        tracing::error!(peer = %peer, error = %e, "reconnect for resend failed");
                        return Err(TransportError::ResendFailed {
                            peer: peer.clone(),
                            reason: format!("reconnect for resend failed: {e}"),
                        });
                    }
                    Phase::Resend
                }
                Phase::Resend => match session.send(message).await {
                    Ok(response) => return Ok(response),
                    Err(e) if e.is_channel_failure() => {
                        tracing::error!(peer = %peer, error = %e, "resend failed again");
                        return Err(TransportError::ResendFailed {
                            peer: peer.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                },
            };
        }
    }
}

impl<P: Providers> std::fmt::Debug for ConnectorTransport<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorTransport")
            .field("peer", &self.ctx.peer.name)
            .field("targets", &self.ctx.peer.targets.to_string())
            .finish()
    }
}
