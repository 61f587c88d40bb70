//! Loopback transport for testing.
//!
//! A [`LoopbackNetwork`] is an in-process datagram network: every
//! [`LoopbackTransport`] bound on it gets a [`SocketAddr`], and sending to
//! that address pushes into the endpoint's [`tokio::sync::mpsc`] channel.
//! Dropping a transport unbinds its address, after which sends to it fail
//! with [`TransportError::Unreachable`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Transport, TransportError};

type Datagram = (SocketAddr, Vec<u8>);

/// First port handed out by [`LoopbackNetwork::bind_ephemeral`].
const FIRST_EPHEMERAL_PORT: u16 = 49_152;

#[derive(Debug)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    next_port: u16,
}

/// Shared in-process network. Cloning yields another handle to the same
/// network.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                endpoints: HashMap::new(),
                next_port: FIRST_EPHEMERAL_PORT,
            })),
        }
    }

    /// Bind an endpoint on a specific address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unavailable`] if the address is taken.
    pub fn bind(&self, addr: SocketAddr) -> Result<LoopbackTransport, TransportError> {
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&addr) {
            return Err(TransportError::Unavailable {
                addr,
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(addr, tx.clone());
        drop(state);

        Ok(LoopbackTransport {
            local: addr,
            network: self.clone(),
            own_tx: tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Bind an endpoint on the next free `127.0.0.1` port.
    #[must_use]
    pub fn bind_ephemeral(&self) -> LoopbackTransport {
        let mut state = self.state.lock();
        let mut addr = SocketAddr::from(([127, 0, 0, 1], state.next_port));
        while state.endpoints.contains_key(&addr) {
            state.next_port = state.next_port.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);
            addr.set_port(state.next_port);
        }
        state.next_port = state.next_port.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);

        let (tx, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(addr, tx.clone());
        drop(state);

        LoopbackTransport {
            local: addr,
            network: self.clone(),
            own_tx: tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Whether an endpoint is currently bound on `addr`.
    #[must_use]
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.state.lock().endpoints.contains_key(&addr)
    }

    fn sender_for(&self, addr: SocketAddr) -> Option<mpsc::UnboundedSender<Datagram>> {
        self.state.lock().endpoints.get(&addr).cloned()
    }

    fn unbind(&self, addr: SocketAddr, own_tx: &mpsc::UnboundedSender<Datagram>) {
        let mut state = self.state.lock();
        if state
            .endpoints
            .get(&addr)
            .is_some_and(|tx| tx.same_channel(own_tx))
        {
            state.endpoints.remove(&addr);
        }
    }
}

impl Connector for LoopbackNetwork {
    type Transport = LoopbackTransport;

    async fn open(&self) -> Result<LoopbackTransport, TransportError> {
        Ok(self.bind_ephemeral())
    }
}

/// One endpoint on a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackTransport {
    local: SocketAddr,
    network: LoopbackNetwork,
    own_tx: mpsc::UnboundedSender<Datagram>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl Transport for LoopbackTransport {
    async fn send(&self, to: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let sender = self
            .network
            .sender_for(to)
            .ok_or(TransportError::Unreachable(to))?;
        sender
            .send((self.local, payload.to_vec()))
            .map_err(|_| TransportError::Unreachable(to))
    }

    async fn recv(&self) -> Result<(SocketAddr, Vec<u8>), TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.local)
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.network.unbind(self.local, &self.own_tx);
    }
}
