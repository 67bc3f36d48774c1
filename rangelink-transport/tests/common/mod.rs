//! Shared fixtures: a scripted HTTP peer on the simulated network.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::http::request::Parts;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rangelink_sim::{NetworkProvider, SimNetworkProvider, TcpListenerTrait};
use tokio::task::JoinHandle;

/// What the peer does with the n-th accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPlan {
    /// Serve HTTP with keep-alive.
    Serve,
    /// Close the connection without reading anything.
    DropImmediately,
    /// Hold the connection open and never answer.
    Hang,
}

/// Builds the reply for one request.
pub type Responder = fn(&Parts, &Bytes) -> Response<Full<Bytes>>;

/// A peer listening on the simulated network.
pub struct TestPeer {
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestPeer {
    /// Bind `addr` and handle connections according to `plan`; connections
    /// beyond the plan are served.
    pub async fn start(
        network: &SimNetworkProvider,
        addr: &str,
        plan: Vec<ConnectionPlan>,
        responder: Responder,
    ) -> Self {
        let listener = network.bind(addr).await.expect("bind test peer");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _peer)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                match plan.get(index).copied().unwrap_or(ConnectionPlan::Serve) {
                    ConnectionPlan::Serve => {
                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle(req, responder));
                            let _ = hyper::server::conn::http1::Builder::new()
                                .keep_alive(true)
                                .serve_connection(TokioIo::new(stream), service)
                                .await;
                        });
                    }
                    ConnectionPlan::DropImmediately => drop(stream),
                    ConnectionPlan::Hang => held.push(stream),
                }
            }
        });

        Self { accepted, task }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(
    req: Request<Incoming>,
    responder: Responder,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(responder(&parts, &body))
}

/// Reply 200 with the request body.
pub fn echo(_parts: &Parts, body: &Bytes) -> Response<Full<Bytes>> {
    Response::new(Full::new(body.clone()))
}

/// Reply with a bare status.
pub fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}

/// Let spawned tasks observe closed streams.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
