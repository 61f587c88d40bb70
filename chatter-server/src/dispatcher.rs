//! Server session dispatcher: the single reactor loop of the membership
//! server.
//!
//! Every received datagram is decoded and dispatched by kind:
//! 1. `JoinRequest`: register, reply `JoinAccepted` or `JoinRejected`, and
//!    announce the newcomer to everyone else.
//! 2. `Chat`: relay to every member, the sender included, if it comes from
//!    a registered member's own endpoint.
//! 3. `LeaveRequest`: unregister, acknowledge, and announce the departure.
//! 4. `Heartbeat`: refresh the member's liveness.
//!
//! Malformed datagrams and kinds only the server sends are logged and
//! dropped. Nothing a peer sends can end the loop.
//!
//! A periodic sweep evicts members whose endpoint has been silent for
//! longer than the member timeout and announces each as `MemberLeft`.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use chatter_proto::codec;
use chatter_proto::message::Message;
use chatter_proto::transport::udp::UdpTransport;
use chatter_proto::transport::{Transport, TransportError};

use crate::registry::MemberRegistry;

/// Default maximum chat body length in bytes.
pub const DEFAULT_MAX_BODY_LEN: usize = 4096;

/// Default time a member may stay silent before it is evicted.
pub const DEFAULT_MEMBER_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of idle sweeps per member timeout.
const SWEEPS_PER_TIMEOUT: u32 = 3;

/// Owns the transport and the member registry for one server process.
pub struct Dispatcher<T: Transport> {
    transport: T,
    registry: MemberRegistry,
    max_body_len: usize,
    member_timeout: Duration,
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a dispatcher over a bound transport.
    #[must_use]
    pub const fn new(transport: T, registry: MemberRegistry) -> Self {
        Self {
            transport,
            registry,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            member_timeout: DEFAULT_MEMBER_TIMEOUT,
        }
    }

    /// Sets the maximum accepted chat body length in bytes.
    #[must_use]
    pub const fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    /// Sets how long a member may stay silent before it is evicted.
    #[must_use]
    pub const fn with_member_timeout(mut self, member_timeout: Duration) -> Self {
        self.member_timeout = member_timeout;
        self
    }

    /// The member registry.
    #[must_use]
    pub const fn registry(&self) -> &MemberRegistry {
        &self.registry
    }

    /// The welcome endpoint clients send to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the transport cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.transport.local_addr()
    }

    /// Runs the dispatch loop until `shutdown` resolves.
    ///
    /// Shutdown simply stops processing: no further joins are accepted and
    /// members are not notified.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let period = (self.member_timeout / SWEEPS_PER_TIMEOUT).max(Duration::from_millis(1));
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(members = self.registry.len(), "dispatcher shutting down");
                    break;
                }
                _ = sweep.tick() => self.sweep_idle().await,
                received = self.transport.recv() => match received {
                    Ok((from, bytes)) => self.handle_datagram(from, &bytes).await,
                    Err(TransportError::ConnectionClosed) => {
                        tracing::error!("transport closed, stopping dispatcher");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "receive failed");
                    }
                },
            }
        }
    }

    /// Decodes and dispatches a single datagram.
    pub async fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        let message = match codec::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(peer = %from, len = bytes.len(), error = %e, "dropping malformed datagram");
                return;
            }
        };

        tracing::debug!(peer = %from, kind = message.kind(), "received");

        match message {
            Message::JoinRequest { screen_name } => self.handle_join(from, screen_name).await,
            Message::Chat { sender, body } => self.handle_chat(from, sender, body).await,
            Message::LeaveRequest { screen_name } => self.handle_leave(from, screen_name).await,
            Message::Heartbeat { screen_name } => {
                if !self.registry.touch(&screen_name, from) {
                    tracing::debug!(peer = %from, screen_name = %screen_name, "heartbeat from non-member");
                }
            }
            other => {
                tracing::warn!(peer = %from, kind = other.kind(), "unexpected message kind from client");
            }
        }
    }

    async fn handle_join(&mut self, from: SocketAddr, screen_name: String) {
        match self.registry.try_join(&screen_name, from) {
            Ok(roster) => {
                tracing::info!(
                    peer = %from,
                    screen_name = %screen_name,
                    members = roster.len(),
                    "member joined"
                );
                self.reply(from, &Message::JoinAccepted { roster }).await;
                let joined = Message::MemberJoined {
                    screen_name: screen_name.clone(),
                };
                self.broadcast(&joined, Some(&screen_name)).await;
            }
            Err(e) => {
                tracing::info!(peer = %from, screen_name = %screen_name, error = %e, "join rejected");
                self.reply(from, &Message::JoinRejected { reason: e.reason() })
                    .await;
            }
        }
    }

    async fn handle_chat(&mut self, from: SocketAddr, sender: String, body: String) {
        match self.registry.get(&sender) {
            Some(member) if member.address == from => {}
            Some(member) => {
                tracing::warn!(
                    peer = %from,
                    sender = %sender,
                    registered = %member.address,
                    "dropping chat from an endpoint that does not own the sender name"
                );
                return;
            }
            None => {
                tracing::debug!(peer = %from, sender = %sender, "dropping chat from unregistered sender");
                return;
            }
        }
        self.registry.touch(&sender, from);

        if body.len() > self.max_body_len {
            tracing::warn!(
                sender = %sender,
                size = body.len(),
                max = self.max_body_len,
                "dropping oversized chat body"
            );
            return;
        }

        tracing::debug!(sender = %sender, len = body.len(), "relaying chat");
        self.broadcast(&Message::Chat { sender, body }, None).await;
    }

    async fn handle_leave(&mut self, from: SocketAddr, screen_name: String) {
        if let Some(member) = self.registry.get(&screen_name)
            && member.address != from
        {
            tracing::warn!(
                peer = %from,
                screen_name = %screen_name,
                registered = %member.address,
                "dropping leave request from an endpoint that does not own the name"
            );
            return;
        }

        let removed = self.registry.leave(&screen_name).is_some();
        tracing::info!(peer = %from, screen_name = %screen_name, removed, "leave request");

        self.reply(
            from,
            &Message::LeaveAcknowledged {
                screen_name: screen_name.clone(),
            },
        )
        .await;

        if removed {
            let left = Message::MemberLeft {
                screen_name: screen_name.clone(),
            };
            self.broadcast(&left, Some(&screen_name)).await;
        }
    }

    /// Evicts members silent for longer than the member timeout and
    /// announces each departure to the members that remain.
    pub async fn sweep_idle(&mut self) {
        for member in self.registry.expire_idle(self.member_timeout) {
            tracing::info!(
                screen_name = %member.screen_name,
                peer = %member.address,
                timeout_ms = self.member_timeout.as_millis(),
                "evicted idle member"
            );
            let left = Message::MemberLeft {
                screen_name: member.screen_name,
            };
            self.broadcast(&left, None).await;
        }
    }

    /// Encodes and sends a message to a single endpoint.
    async fn reply(&self, to: SocketAddr, message: &Message) {
        let bytes = match codec::encode(message) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.transport.send(to, &bytes).await {
            tracing::warn!(peer = %to, kind = message.kind(), error = %e, "reply failed");
        }
    }

    /// Broadcasts to the registry and evicts members found unreachable,
    /// announcing each eviction as a `MemberLeft`.
    async fn broadcast(&mut self, message: &Message, excluding: Option<&str>) {
        let mut unreachable = match self
            .registry
            .broadcast(&self.transport, message, excluding)
            .await
        {
            Ok(names) => names,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "failed to encode broadcast");
                return;
            }
        };

        while let Some(name) = unreachable.pop() {
            if self.registry.leave(&name).is_none() {
                continue;
            }
            tracing::info!(screen_name = %name, "evicted unreachable member");
            let left = Message::MemberLeft { screen_name: name };
            match self.registry.broadcast(&self.transport, &left, None).await {
                Ok(more) => unreachable.extend(more),
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode eviction notice");
                }
            }
        }
    }
}

/// Binds a UDP socket on `addr` and runs a dispatcher on it in the
/// background with a default registry.
///
/// Returns the bound welcome address and the task handle.
///
/// # Errors
///
/// Returns [`TransportError::Unavailable`] if the socket cannot be bound.
pub async fn start_server(
    addr: SocketAddr,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), TransportError> {
    start_server_with_registry(addr, MemberRegistry::new()).await
}

/// Like [`start_server`], with a pre-configured [`MemberRegistry`].
///
/// # Errors
///
/// Returns [`TransportError::Unavailable`] if the socket cannot be bound.
pub async fn start_server_with_registry(
    addr: SocketAddr,
    registry: MemberRegistry,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), TransportError> {
    let transport = UdpTransport::bind(addr).await?;
    let dispatcher = Dispatcher::new(transport, registry);
    let bound_addr = dispatcher.local_addr()?;

    let handle = tokio::spawn(dispatcher.run_until(std::future::pending()));
    Ok((bound_addr, handle))
}
