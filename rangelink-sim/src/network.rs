//! In-memory network provider.
//!
//! Addresses are plain strings matched exactly, so `kra1:8443` and
//! `127.0.0.1:8443` are different endpoints. A connection is a pair of
//! [`tokio::io::DuplexStream`] halves: the client half is returned from
//! `connect`, the server half is queued on the listener.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rangelink_core::{NetworkProvider, TcpListenerTrait};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// Per-direction buffer of a simulated connection.
const DUPLEX_BUFFER: usize = 64 * 1024;

type Incoming = (DuplexStream, String);

#[derive(Default)]
struct NetworkState {
    listeners: HashMap<String, mpsc::UnboundedSender<Incoming>>,
    blackholed: HashSet<String>,
    connect_attempts: HashMap<String, usize>,
}

/// Simulated network shared by every clone of the provider.
#[derive(Clone, Default)]
pub struct SimNetworkProvider {
    state: Arc<Mutex<NetworkState>>,
    next_client: Arc<AtomicU64>,
}

impl SimNetworkProvider {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the listener on `addr`. Later connects are refused.
    pub fn unbind(&self, addr: &str) {
        self.state.lock().listeners.remove(addr);
    }

    /// Make connects to `addr` hang until the caller gives up.
    pub fn blackhole(&self, addr: &str) {
        self.state.lock().blackholed.insert(addr.to_string());
    }

    /// Connect attempts made against `addr`, successful or not.
    pub fn connect_attempts(&self, addr: &str) -> usize {
        self.state
            .lock()
            .connect_attempts
            .get(addr)
            .copied()
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for SimNetworkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimNetworkProvider")
            .field("listeners", &state.listeners.keys().collect::<Vec<_>>())
            .field("blackholed", &state.blackholed)
            .finish()
    }
}

#[async_trait]
impl NetworkProvider for SimNetworkProvider {
    type TcpStream = DuplexStream;
    type TcpListener = SimTcpListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::TcpListener> {
        let mut state = self.state.lock();
        if let Some(existing) = state.listeners.get(addr)
            && !existing.is_closed()
        {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.listeners.insert(addr.to_string(), tx);
        tracing::trace!(addr, "sim listener bound");
        Ok(SimTcpListener {
            addr: addr.to_string(),
            incoming: tokio::sync::Mutex::new(rx),
        })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream> {
        let sender = {
            let mut state = self.state.lock();
            *state.connect_attempts.entry(addr.to_string()).or_insert(0) += 1;
            if state.blackholed.contains(addr) {
                None
            } else {
                Some(state.listeners.get(addr).cloned())
            }
        };

        let Some(sender) = sender else {
            std::future::pending::<()>().await;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "black-holed"));
        };

        let refused = || {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection refused by {addr}"),
            )
        };
        let sender = sender.ok_or_else(refused)?;

        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        let peer = format!("sim-client-{}", self.next_client.fetch_add(1, Ordering::Relaxed));
        sender.send((server, peer)).map_err(|_| refused())?;
        Ok(client)
    }
}

/// Listener half of the simulated network.
pub struct SimTcpListener {
    addr: String,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
}

#[async_trait]
impl TcpListenerTrait for SimTcpListener {
    type TcpStream = DuplexStream;

    async fn accept(&self) -> io::Result<(Self::TcpStream, String)> {
        self.incoming.lock().await.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "listener unbound")
        })
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.addr.clone())
    }
}
