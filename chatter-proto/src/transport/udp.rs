//! UDP transport backed by [`tokio::net::UdpSocket`].

use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::{Connector, Transport, TransportError};
use crate::codec::MAX_DATAGRAM_SIZE;

/// A bound UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a UDP socket on `addr`. Port 0 picks an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unavailable`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Unavailable { addr, source })?;
        tracing::debug!(addr = ?socket.local_addr().ok(), "udp socket bound");
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    async fn send(&self, to: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        match self.socket.send_to(payload, to).await {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionRefused
                        | ErrorKind::HostUnreachable
                        | ErrorKind::NetworkUnreachable
                ) =>
            {
                Err(TransportError::Unreachable(to))
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    async fn recv(&self) -> Result<(SocketAddr, Vec<u8>), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((from, buf))
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

/// Opens a fresh [`UdpTransport`] on a fixed bind address.
#[derive(Debug, Clone, Copy)]
pub struct UdpConnector {
    bind_addr: SocketAddr,
}

impl UdpConnector {
    /// Creates a connector that binds every new socket on `bind_addr`.
    #[must_use]
    pub const fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

impl Connector for UdpConnector {
    type Transport = UdpTransport;

    async fn open(&self) -> Result<UdpTransport, TransportError> {
        UdpTransport::bind(self.bind_addr).await
    }
}
