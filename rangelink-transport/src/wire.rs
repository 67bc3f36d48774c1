//! HTTP/1.1 framing of connector messages.
//!
//! Every message travels as a `POST` with an explicit `Content-Length` and
//! `Connection: Keep-Alive`, so one channel carries many sequential
//! exchanges. hyper accepts any `AsyncRead + AsyncWrite` through
//! [`TokioIo`], which lets the same code run over real sockets and the
//! simulated network.

use std::io;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use rangelink_core::{NetworkProvider, PeerAddress, Providers, TaskProvider};
use tokio::task::JoinHandle;

use crate::error::TransportError;

/// Method used for every connector request.
pub const CONNECTOR_METHOD: Method = Method::POST;

/// An outbound message: opaque body plus routing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiMessage {
    /// Request URI on the peer, e.g. `/kra/agent/kra/connector`.
    pub uri: String,
    /// Value of the `Content-Type` header.
    pub content_type: String,
    /// Encoded message body.
    pub body: Bytes,
}

impl PkiMessage {
    /// Create a message.
    pub fn new(uri: impl Into<String>, content_type: impl Into<String>, body: Bytes) -> Self {
        Self {
            uri: uri.into(),
            content_type: content_type.into(),
            body,
        }
    }

    /// Frame the message for `host`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the URI or a header
    /// value cannot be encoded.
    pub fn to_request(&self, host: &PeerAddress) -> Result<Request<Full<Bytes>>, TransportError> {
        Request::builder()
            .method(CONNECTOR_METHOD)
            .uri(self.uri.as_str())
            .header(HOST, host.to_string())
            .header(CONNECTION, "Keep-Alive")
            .header(CONTENT_TYPE, self.content_type.as_str())
            .header(CONTENT_LENGTH, self.body.len())
            .body(Full::new(self.body.clone()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }
}

/// A reply as received from the peer, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase from the status line, or the canonical one.
    pub reason: String,
    /// Reply body.
    pub body: Bytes,
}

impl PkiResponse {
    /// True for status 200.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A live HTTP/1.1 connection to one candidate.
///
/// The connection driver runs as a separate task and is aborted when the
/// channel is dropped.
pub(crate) struct Channel {
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
}

impl Channel {
    /// Send one request and read the full reply.
    ///
    /// Callers hold `&mut self`, so exchanges on one channel never overlap.
    pub(crate) async fn round_trip(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> Result<PkiResponse, hyper::Error> {
        self.sender.ready().await?;
        let response = self.sender.send_request(request).await?;

        let status = response.status();
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        let body = response.into_body().collect().await?.to_bytes();

        Ok(PkiResponse {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Open a transport connection to `address` and complete the HTTP handshake.
pub(crate) async fn open_channel<P: Providers>(
    providers: &P,
    address: &PeerAddress,
) -> io::Result<Channel> {
    let stream = providers.network().connect(&address.to_string()).await?;
    let (sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(io::Error::other)?;

    let target = address.to_string();
    let driver = providers.task().spawn_task("connector_channel", async move {
        if let Err(e) = connection.await {
            tracing::debug!(peer = %target, error = %e, "channel driver stopped");
        }
    });

    Ok(Channel { sender, driver })
}
