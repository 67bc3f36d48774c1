//! Typed request/reply exchange on top of [`ConnectorTransport`].
//!
//! The exchange encodes a request with its [`MessageCodec`], delivers it and
//! classifies the reply:
//!
//! | Reply                 | Result                                |
//! |-----------------------|---------------------------------------|
//! | 200, decodable body   | `Ok(reply)`                           |
//! | 200, undecodable body | [`ExchangeError::Protocol`]           |
//! | 401                   | [`ExchangeError::AuthenticationFailed`] |
//! | anything else         | [`ExchangeError::RemoteRejected`]     |
//!
//! Nothing here retries. Redelivery is the transport's single
//! reconnect-and-resend; an authentication failure must reach the operator.

use std::time::Duration;

use bytes::Bytes;
use rangelink_core::{JsonCodec, MessageCodec, Providers, TimeProvider};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connector::ConnectorTransport;
use crate::error::{ExchangeError, TransportError};
use crate::wire::{PkiMessage, PkiResponse};

/// Status the peer returns for an accepted request.
pub const STATUS_OK: u16 = 200;

/// Status the peer returns when it does not trust the caller.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Sends typed messages to one peer and classifies the replies.
pub struct MessageExchange<P: Providers, C: MessageCodec = JsonCodec> {
    transport: ConnectorTransport<P>,
    codec: C,
}

impl<P: Providers> MessageExchange<P, JsonCodec> {
    /// Exchange JSON bodies over `transport`.
    pub fn json(transport: ConnectorTransport<P>) -> Self {
        Self::new(transport, JsonCodec)
    }
}

impl<P: Providers, C: MessageCodec> MessageExchange<P, C> {
    /// Create an exchange with an explicit codec.
    pub fn new(transport: ConnectorTransport<P>, codec: C) -> Self {
        Self { transport, codec }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &ConnectorTransport<P> {
        &self.transport
    }

    /// Send `request` to the peer's default URI.
    ///
    /// # Errors
    ///
    /// See [`send_to`](MessageExchange::send_to).
    pub async fn send<Req, Resp>(&self, request: &Req) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let uri = self.resolve_uri(None)?;
        self.exchange(uri, request).await
    }

    /// Send `request` to `uri` instead of the peer default.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::Transport`] if the message could not be delivered
    /// - [`ExchangeError::AuthenticationFailed`] on status 401
    /// - [`ExchangeError::RemoteRejected`] on any other non-200 status
    /// - [`ExchangeError::Protocol`] if the request cannot be encoded or the
    ///   reply decoded
    pub async fn send_to<Req, Resp>(&self, uri: &str, request: &Req) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let uri = self.resolve_uri(Some(uri))?;
        self.exchange(uri, request).await
    }

    /// Like [`send`](MessageExchange::send) with an overall deadline.
    ///
    /// The in-flight connect or send is abandoned when the deadline fires
    /// and its session is discarded rather than returned to the pool.
    ///
    /// # Errors
    ///
    /// As for `send_to`, plus [`TransportError::Timeout`] for the deadline.
    pub async fn send_with_timeout<Req, Resp>(
        &self,
        request: &Req,
        deadline: Duration,
    ) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let uri = self.resolve_uri(None)?;
        match self
            .transport
            .providers()
            .time()
            .timeout(deadline, self.exchange(uri, request))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(peer = %self.peer_name(), ?deadline, "caller deadline elapsed");
                Err(TransportError::Timeout {
                    operation: "call",
                    after: deadline,
                }
                .into())
            }
        }
    }

    /// Send pre-encoded content and return the accepted reply as is.
    ///
    /// `uri` overrides the peer default when given.
    ///
    /// # Errors
    ///
    /// As for `send_to`, except that the reply body is not decoded.
    /// Empty content is rejected with [`TransportError::EmptyContent`].
    pub async fn send_content(
        &self,
        content: Bytes,
        uri: Option<&str>,
    ) -> Result<PkiResponse, ExchangeError> {
        let uri = self.resolve_uri(uri)?;
        let message = PkiMessage::new(uri, self.content_type(), content);
        let response = self.transport.send(&message).await?;
        self.classify(response)
    }

    async fn exchange<Req, Resp>(&self, uri: String, request: &Req) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = self
            .codec
            .encode(request)
            .map_err(|e| ExchangeError::Protocol(format!("could not encode request: {e}")))?;
        tracing::trace!(bytes = body.len(), "encoded request");

        let message = PkiMessage::new(uri, self.content_type(), Bytes::from(body));
        let response = self.transport.send(&message).await?;
        let response = self.classify(response)?;

        if response.body.is_empty() {
            tracing::debug!(peer = %self.peer_name(), "reply has empty content");
        }
        self.codec
            .decode(&response.body)
            .map_err(|e| ExchangeError::Protocol(format!("could not decode content: {e}")))
    }

    /// Map a reply to success or one of the distinct failure kinds.
    fn classify(&self, response: PkiResponse) -> Result<PkiResponse, ExchangeError> {
        match response.status {
            STATUS_OK => Ok(response),
            STATUS_UNAUTHORIZED => {
                tracing::error!(
                    peer = %self.peer_name(),
                    status = response.status,
                    reason = %response.reason,
                    "request no good"
                );
                Err(ExchangeError::AuthenticationFailed {
                    status: response.status,
                    reason: response.reason,
                })
            }
            code => {
                tracing::error!(
                    peer = %self.peer_name(),
                    status = code,
                    reason = %response.reason,
                    "request no good"
                );
                Err(ExchangeError::RemoteRejected {
                    code,
                    reason: response.reason,
                })
            }
        }
    }

    fn resolve_uri(&self, uri: Option<&str>) -> Result<String, TransportError> {
        uri.or(self.transport.peer().uri.as_deref())
            .map(str::to_string)
            .ok_or_else(|| TransportError::MissingUri {
                peer: self.peer_name().to_string(),
            })
    }

    fn content_type(&self) -> String {
        self.transport
            .peer()
            .content_type
            .clone()
            .unwrap_or_else(|| self.codec.content_type().to_string())
    }

    fn peer_name(&self) -> &str {
        &self.transport.peer().name
    }
}
