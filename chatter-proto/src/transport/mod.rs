//! Transport Channel abstraction for Chatter.
//!
//! Defines the [`Transport`] trait: a thin, unreliable, unordered datagram
//! channel addressed by [`SocketAddr`]. All reliability (acknowledgments,
//! timeouts) lives in the protocol layers above. Implementations:
//! - [`udp::UdpTransport`]: tokio UDP socket used by both binaries
//! - [`loopback::LoopbackTransport`]: in-process datagram network for tests
//!
//! A [`Connector`] opens fresh transports; the client opens one per
//! session and drops it when the session returns to `Disconnected`.

pub mod loopback;
pub mod udp;

use std::future::Future;
use std::net::SocketAddr;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be bound or opened.
    #[error("transport unavailable on {addr}: {source}")]
    Unavailable {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The destination endpoint is known to be unreachable.
    #[error("endpoint {0} is unreachable")]
    Unreachable(SocketAddr),

    /// The channel has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async datagram channel.
///
/// # Invariant
///
/// [`Transport::send`] hands the payload to the network and returns; it
/// gives no delivery or ordering guarantee. Callers that need confirmation
/// must wait for a protocol-level reply.
pub trait Transport: Send + Sync {
    /// Send one datagram to `to`.
    fn send(
        &self,
        to: SocketAddr,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next datagram from any endpoint.
    fn recv(&self) -> impl Future<Output = Result<(SocketAddr, Vec<u8>), TransportError>> + Send;

    /// The endpoint other parties use to address replies to us.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the local address cannot be read.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// Opens new transports on demand.
pub trait Connector: Send + Sync {
    /// The transport type this connector produces.
    type Transport: Transport + 'static;

    /// Open a fresh transport.
    fn open(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
