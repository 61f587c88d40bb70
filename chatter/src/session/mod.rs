//! Client session state machine.
//!
//! A [`Session`] drives one client through the membership lifecycle:
//!
//! ```text
//! Disconnected --connect--> Connecting --JoinAccepted--> Connected
//!      ^                        |                           |
//!      |          JoinRejected / join deadline          disconnect
//!      |                        v                           v
//!      +<----------------- Disconnected      Disconnecting --LeaveAcknowledged / leave deadline--+
//!      +<----------------------------------------------------------------------------------------+
//! ```
//!
//! The session runs as a single cooperative loop ([`Session::run`]) that
//! races presentation commands, datagrams from the server, the armed
//! deadline and the heartbeat timer. The transport is opened on `connect`
//! and dropped only on the transition back to `Disconnected`, never while a
//! leave handshake is in flight.
//!
//! The presentation layer talks to the loop through [`SessionHandle`] and
//! observes it through [`SessionEvent`]s. Events are offered with
//! `try_send`: a presentation layer that falls behind loses events, it
//! never stalls the loop.

pub mod handle;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use chatter_proto::codec;
use chatter_proto::message::{Message, RejectReason, Roster, validate_screen_name};
use chatter_proto::transport::{Connector, Transport, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use handle::{SessionClosed, SessionCommand, SessionHandle, SubmitError, spawn_session};

/// Default bound on the wait for `JoinAccepted` / `JoinRejected`.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the wait for `LeaveAcknowledged`.
pub const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default capacity of the event channel towards the presentation layer.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Default spacing of heartbeats while joined. Well inside the server's
/// default member timeout.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Connection status of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport is open.
    Disconnected,
    /// Join request sent, waiting for the server's answer.
    Connecting,
    /// Joined; chat flows.
    Connected,
    /// Leave request sent, waiting for the acknowledgment.
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Why a connect attempt ended back in `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectFailure {
    /// The server already has a member with this name.
    #[error("screen name already in use")]
    DuplicateName,
    /// The screen name is not acceptable.
    #[error("invalid screen name: {0}")]
    InvalidScreenName(String),
    /// The server has no room for another member.
    #[error("server is full")]
    ServerFull,
    /// The server did not answer within the join bound.
    #[error("no answer from server within {0:?}")]
    Timeout(Duration),
    /// The local socket could not be opened.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// The server host did not resolve.
    #[error("cannot resolve server address {0}")]
    Unresolvable(String),
    /// Port 0 cannot address a server.
    #[error("invalid server port 0")]
    InvalidPort,
}

impl From<RejectReason> for ConnectFailure {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::DuplicateName => Self::DuplicateName,
            RejectReason::InvalidScreenName => Self::InvalidScreenName(reason.to_string()),
            RejectReason::ServerFull => Self::ServerFull,
        }
    }
}

/// One received chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Position in the order the server relayed messages to us.
    pub sequence: u64,
    /// Author's screen name.
    pub sender: String,
    /// Message text.
    pub body: String,
    /// Local arrival time.
    pub received_at: chrono::DateTime<chrono::Local>,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection status changed.
    StatusChanged(SessionState),
    /// The member roster changed (empty after disconnecting).
    RosterChanged(Roster),
    /// A chat message arrived.
    ChatReceived(ChatLine),
    /// A connect attempt failed.
    ConnectFailed(ConnectFailure),
    /// A command was not legal in the current state and was ignored.
    CommandIgnored {
        /// Name of the ignored command.
        command: &'static str,
        /// State the session was in.
        state: SessionState,
    },
    /// The session loop has ended; the presentation layer may close.
    Stopped,
}

/// Timing and buffering knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on the join handshake.
    pub join_timeout: Duration,
    /// Bound on the leave handshake.
    pub leave_timeout: Duration,
    /// Event channel capacity.
    pub event_buffer: usize,
    /// Spacing of heartbeats while joined. Zero disables them.
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// The client-side protocol state for one process.
pub struct Session<C: Connector> {
    connector: C,
    config: SessionConfig,
    events: mpsc::Sender<SessionEvent>,
    state: SessionState,
    transport: Option<C::Transport>,
    server: Option<SocketAddr>,
    screen_name: String,
    roster: Roster,
    next_sequence: u64,
    deadline: Option<Instant>,
    next_heartbeat: Option<Instant>,
    stopping: bool,
}

impl<C: Connector> Session<C> {
    /// Creates a disconnected session that reports to `events`.
    pub fn new(connector: C, config: SessionConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            connector,
            config,
            events,
            state: SessionState::Disconnected,
            transport: None,
            server: None,
            screen_name: String::new(),
            roster: Vec::new(),
            next_sequence: 0,
            deadline: None,
            next_heartbeat: None,
            stopping: false,
        }
    }

    /// Runs the session loop until a stop completes.
    ///
    /// A stop is requested by [`SessionCommand::Stop`] or by closing the
    /// command channel.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut commands_open = true;

        loop {
            if self.stopping && self.state == SessionState::Disconnected {
                break;
            }

            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        commands_open = false;
                        self.stop().await;
                    }
                },
                received = recv_next(self.transport.as_ref()) => {
                    self.handle_received(received);
                }
                () = wait_until(self.deadline) => self.handle_deadline(),
                () = wait_until(self.next_heartbeat) => self.heartbeat().await,
            }
        }

        tracing::info!(messages = self.next_sequence, "session stopped");
        self.emit(SessionEvent::Stopped);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect {
                screen_name,
                host,
                port,
            } => self.connect(screen_name, &host, port).await,
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::SendChat { body } => self.send_chat(body).await,
            SessionCommand::Stop => self.stop().await,
        }
    }

    async fn connect(&mut self, screen_name: String, host: &str, port: u16) {
        if self.state != SessionState::Disconnected || self.stopping {
            self.ignore("connect");
            return;
        }
        if let Err(e) = validate_screen_name(&screen_name) {
            self.emit(SessionEvent::ConnectFailed(ConnectFailure::InvalidScreenName(
                e.to_string(),
            )));
            return;
        }
        if port == 0 {
            self.emit(SessionEvent::ConnectFailed(ConnectFailure::InvalidPort));
            return;
        }

        let transport = match self.connector.open().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "failed to open transport");
                self.emit(SessionEvent::ConnectFailed(
                    ConnectFailure::TransportUnavailable(e.to_string()),
                ));
                return;
            }
        };

        let local = transport.local_addr().ok();
        let server = match resolve(host, port, local).await {
            Ok(addr) => addr,
            Err(failure) => {
                tracing::warn!(host, port, "server address did not resolve");
                self.emit(SessionEvent::ConnectFailed(failure));
                return;
            }
        };

        tracing::info!(screen_name = %screen_name, server = %server, local = ?local, "joining");
        self.transport = Some(transport);
        self.server = Some(server);
        self.screen_name = screen_name;
        self.roster.clear();
        self.set_state(SessionState::Connecting);

        let join = Message::JoinRequest {
            screen_name: self.screen_name.clone(),
        };
        self.send(&join).await;
        self.deadline = Some(Instant::now() + self.config.join_timeout);
    }

    /// Starts the leave handshake. Legal while `Connected`, and while
    /// `Connecting` to cancel a join whose answer may still be in flight.
    async fn disconnect(&mut self) {
        match self.state {
            SessionState::Connected | SessionState::Connecting => {
                let leave = Message::LeaveRequest {
                    screen_name: self.screen_name.clone(),
                };
                self.send(&leave).await;
                self.set_state(SessionState::Disconnecting);
                self.next_heartbeat = None;
                self.deadline = Some(Instant::now() + self.config.leave_timeout);
            }
            SessionState::Disconnecting | SessionState::Disconnected => {
                self.ignore("disconnect");
            }
        }
    }

    async fn send_chat(&mut self, body: String) {
        if self.state != SessionState::Connected {
            self.ignore("send_chat");
            return;
        }
        let chat = Message::Chat {
            sender: self.screen_name.clone(),
            body,
        };
        self.send(&chat).await;
        // Chat refreshes the server's last-seen time as well.
        self.arm_heartbeat();
    }

    async fn heartbeat(&mut self) {
        self.next_heartbeat = None;
        if self.state != SessionState::Connected {
            return;
        }
        tracing::trace!(screen_name = %self.screen_name, "heartbeat");
        let heartbeat = Message::Heartbeat {
            screen_name: self.screen_name.clone(),
        };
        self.send(&heartbeat).await;
        self.arm_heartbeat();
    }

    fn arm_heartbeat(&mut self) {
        let interval = self.config.heartbeat_interval;
        self.next_heartbeat = (!interval.is_zero()).then(|| Instant::now() + interval);
    }

    async fn stop(&mut self) {
        self.stopping = true;
        match self.state {
            SessionState::Connected | SessionState::Connecting => self.disconnect().await,
            SessionState::Disconnecting | SessionState::Disconnected => {}
        }
    }

    fn handle_received(&mut self, received: Result<(SocketAddr, Vec<u8>), TransportError>) {
        let (from, bytes) = match received {
            Ok(datagram) => datagram,
            Err(TransportError::ConnectionClosed) => {
                tracing::warn!(state = %self.state, "transport closed underneath the session");
                if self.state == SessionState::Connecting {
                    self.fail_connect(ConnectFailure::TransportUnavailable(
                        "connection closed".to_string(),
                    ));
                } else {
                    self.finish_disconnect();
                }
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "receive failed");
                return;
            }
        };

        if !self.is_server(from) {
            tracing::debug!(peer = %from, "ignoring datagram from a non-server endpoint");
            return;
        }

        match codec::decode(&bytes) {
            Ok(message) => self.handle_message(from, message),
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "dropping malformed datagram");
            }
        }
    }

    /// Whether `from` speaks for the server.
    ///
    /// A server bound on a wildcard address may answer from another local
    /// address than the one we resolved, so while the join is pending any
    /// host on the server's port is accepted. The join reply then pins the
    /// endpoint and everything after must come from it.
    fn is_server(&self, from: SocketAddr) -> bool {
        match self.server {
            Some(server) if server == from => true,
            Some(server) => {
                self.state == SessionState::Connecting && server.port() == from.port()
            }
            None => false,
        }
    }

    fn handle_message(&mut self, from: SocketAddr, message: Message) {
        tracing::debug!(state = %self.state, kind = message.kind(), "received");

        match (self.state, message) {
            (SessionState::Connecting, Message::JoinAccepted { roster }) => {
                if self.server != Some(from) {
                    tracing::info!(
                        resolved = ?self.server,
                        answered = %from,
                        "server answered from another address"
                    );
                    self.server = Some(from);
                }
                self.deadline = None;
                self.roster = roster;
                self.set_state(SessionState::Connected);
                self.arm_heartbeat();
                self.emit(SessionEvent::RosterChanged(self.roster.clone()));
            }
            (SessionState::Connecting, Message::JoinRejected { reason }) => {
                tracing::info!(%reason, "join rejected");
                self.fail_connect(reason.into());
            }
            (SessionState::Connected, Message::Chat { sender, body }) => {
                let line = ChatLine {
                    sequence: self.next_sequence,
                    sender,
                    body,
                    received_at: chrono::Local::now(),
                };
                self.next_sequence += 1;
                self.emit(SessionEvent::ChatReceived(line));
            }
            (SessionState::Connected, Message::MemberJoined { screen_name }) => {
                if !self.roster.contains(&screen_name) {
                    self.roster.push(screen_name);
                    self.emit(SessionEvent::RosterChanged(self.roster.clone()));
                }
            }
            (SessionState::Connected, Message::MemberLeft { screen_name }) => {
                let before = self.roster.len();
                self.roster.retain(|name| *name != screen_name);
                if self.roster.len() != before {
                    self.emit(SessionEvent::RosterChanged(self.roster.clone()));
                }
            }
            (SessionState::Disconnecting, Message::LeaveAcknowledged { screen_name })
                if screen_name == self.screen_name =>
            {
                tracing::info!(screen_name = %screen_name, "leave acknowledged");
                self.finish_disconnect();
            }
            (state, other) => {
                tracing::debug!(%state, kind = other.kind(), "ignoring message in this state");
            }
        }
    }

    fn handle_deadline(&mut self) {
        self.deadline = None;
        match self.state {
            SessionState::Connecting => {
                tracing::warn!(timeout = ?self.config.join_timeout, "no answer to join request");
                self.fail_connect(ConnectFailure::Timeout(self.config.join_timeout));
            }
            SessionState::Disconnecting => {
                tracing::warn!(
                    timeout = ?self.config.leave_timeout,
                    "no leave acknowledgment, releasing transport"
                );
                self.finish_disconnect();
            }
            SessionState::Connected | SessionState::Disconnected => {}
        }
    }

    fn fail_connect(&mut self, failure: ConnectFailure) {
        self.release();
        self.emit(SessionEvent::ConnectFailed(failure));
        self.set_state(SessionState::Disconnected);
    }

    /// Terminal transition to `Disconnected`: the only place the transport
    /// of a joined session is dropped.
    fn finish_disconnect(&mut self) {
        let had_roster = !self.roster.is_empty();
        self.release();
        self.set_state(SessionState::Disconnected);
        if had_roster {
            self.emit(SessionEvent::RosterChanged(Vec::new()));
        }
    }

    fn release(&mut self) {
        self.transport = None;
        self.server = None;
        self.deadline = None;
        self.next_heartbeat = None;
        self.roster.clear();
    }

    /// Encodes and sends a message to the server. Failures are logged; the
    /// armed deadline covers lost or unsendable handshakes.
    async fn send(&self, message: &Message) {
        let (Some(transport), Some(server)) = (self.transport.as_ref(), self.server) else {
            return;
        };
        let bytes = match codec::encode(message) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "failed to encode message");
                return;
            }
        };
        if let Err(e) = transport.send(server, &bytes).await {
            tracing::warn!(kind = message.kind(), server = %server, error = %e, "send failed");
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "session state changed");
        self.state = state;
        self.emit(SessionEvent::StatusChanged(state));
    }

    fn ignore(&self, command: &'static str) {
        tracing::debug!(command, state = %self.state, "command ignored");
        self.emit(SessionEvent::CommandIgnored {
            command,
            state: self.state,
        });
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("event receiver gone");
            }
        }
    }
}

/// Next datagram, or never if no transport is open.
async fn recv_next<T: Transport>(
    transport: Option<&T>,
) -> Result<(SocketAddr, Vec<u8>), TransportError> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves at `deadline`, or never if none is armed.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Resolves `host:port`, preferring an address of the same family as the
/// local socket.
async fn resolve(
    host: &str,
    port: u16,
    local: Option<SocketAddr>,
) -> Result<SocketAddr, ConnectFailure> {
    let unresolvable = || ConnectFailure::Unresolvable(format!("{host}:{port}"));
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| unresolvable())?
        .collect();

    let preferred = local.and_then(|local| {
        candidates
            .iter()
            .find(|addr| addr.is_ipv4() == local.is_ipv4())
            .copied()
    });
    preferred
        .or_else(|| candidates.first().copied())
        .ok_or_else(unresolvable)
}
