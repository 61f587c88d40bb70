//! End-to-end membership tests over real UDP sockets on `127.0.0.1`.
//!
//! A membership server runs in the background and several client sessions
//! join it, chat, and leave:
//! 1. Rosters arrive in join order and follow joins and leaves.
//! 2. A duplicate screen name is rejected without disturbing the room.
//! 3. Every member receives exactly one copy of each chat, in server order.
//! 4. A full server rejects further joins.
//! 5. A member whose client vanished without leaving is evicted once it
//!    falls silent, freeing its screen name.

use std::net::SocketAddr;
use std::time::Duration;

use chatter::session::{
    ChatLine, ConnectFailure, SessionConfig, SessionEvent, SessionHandle, SessionState,
    spawn_session,
};
use chatter_proto::codec;
use chatter_proto::message::{Message, RejectReason};
use chatter_proto::transport::Transport;
use chatter_proto::transport::udp::{UdpConnector, UdpTransport};
use chatter_server::dispatcher::{Dispatcher, start_server, start_server_with_registry};
use chatter_server::registry::MemberRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Client {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<()>,
}

fn localhost() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn client() -> Client {
    client_with(SessionConfig::default())
}

fn client_with(config: SessionConfig) -> Client {
    let (handle, events, task) = spawn_session(UdpConnector::new(localhost()), config);
    Client {
        handle,
        events,
        task,
    }
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

impl Client {
    /// Skips events until one matches, failing after [`WAIT`].
    async fn wait_for<F>(&mut self, what: &str, mut matches: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
                .expect("session ended unexpectedly");
            if matches(&event) {
                return event;
            }
        }
    }

    async fn wait_for_roster(&mut self, expected: &[&str]) {
        let expected = names(expected);
        self.wait_for(&format!("roster {expected:?}"), |e| {
            *e == SessionEvent::RosterChanged(expected.clone())
        })
        .await;
    }

    async fn wait_for_chat(&mut self) -> ChatLine {
        match self
            .wait_for("chat", |e| matches!(e, SessionEvent::ChatReceived(_)))
            .await
        {
            SessionEvent::ChatReceived(line) => line,
            _ => unreachable!(),
        }
    }

    async fn join(&mut self, name: &str, server: SocketAddr) {
        self.handle
            .connect(name, "127.0.0.1", server.port())
            .await
            .unwrap();
        self.wait_for("connected", |e| {
            *e == SessionEvent::StatusChanged(SessionState::Connected)
        })
        .await;
    }

    async fn leave(&mut self) {
        self.handle.disconnect().await.unwrap();
        self.wait_for("disconnected", |e| {
            *e == SessionEvent::StatusChanged(SessionState::Disconnected)
        })
        .await;
    }

    async fn stop(mut self) {
        self.handle.stop().await.unwrap();
        self.wait_for("stopped", |e| *e == SessionEvent::Stopped)
            .await;
        self.task.await.unwrap();
    }
}

/// Sends one raw message from `socket` and decodes the server's reply.
async fn exchange(socket: &UdpTransport, server: SocketAddr, message: &Message) -> Message {
    socket
        .send(server, &codec::encode(message).unwrap())
        .await
        .unwrap();
    let (_, bytes) = tokio::time::timeout(WAIT, socket.recv())
        .await
        .expect("no reply from server")
        .unwrap();
    codec::decode(&bytes).unwrap()
}

async fn server() -> SocketAddr {
    let (addr, _task) = start_server(localhost()).await.unwrap();
    addr
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn alice_and_bob_join_chat_and_leave() {
    let server = server().await;
    let mut alice = client();
    let mut bob = client();

    alice.join("alice", server).await;
    alice.wait_for_roster(&["alice"]).await;

    bob.join("bob", server).await;
    bob.wait_for_roster(&["alice", "bob"]).await;
    alice.wait_for_roster(&["alice", "bob"]).await;

    alice.handle.send_chat("hi bob").await.unwrap();
    for member in [&mut alice, &mut bob] {
        let line = member.wait_for_chat().await;
        assert_eq!(line.sender, "alice");
        assert_eq!(line.body, "hi bob");
    }

    bob.handle.send_chat("hi alice").await.unwrap();
    for member in [&mut alice, &mut bob] {
        let line = member.wait_for_chat().await;
        assert_eq!(line.sender, "bob");
        assert_eq!(line.body, "hi alice");
    }

    bob.leave().await;
    alice.wait_for_roster(&["alice"]).await;

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn duplicate_name_is_rejected_and_room_unchanged() {
    let server = server().await;
    let mut alice = client();
    let mut impostor = client();

    alice.join("alice", server).await;

    impostor
        .handle
        .connect("alice", "127.0.0.1", server.port())
        .await
        .unwrap();
    let failed = impostor
        .wait_for("connect failure", |e| {
            matches!(e, SessionEvent::ConnectFailed(_))
        })
        .await;
    assert_eq!(
        failed,
        SessionEvent::ConnectFailed(ConnectFailure::DuplicateName)
    );

    // The original alice is still joined and still hears the room.
    let mut bob = client();
    bob.join("bob", server).await;
    bob.wait_for_roster(&["alice", "bob"]).await;
    alice.wait_for_roster(&["alice", "bob"]).await;

    // The rejected client can pick another name.
    impostor.join("mallory", server).await;
    impostor.wait_for_roster(&["alice", "bob", "mallory"]).await;
}

#[tokio::test]
async fn every_member_sees_each_chat_once_in_the_same_order() {
    let server = server().await;
    let mut alice = client();
    let mut bob = client();
    let mut carol = client();

    alice.join("alice", server).await;
    bob.join("bob", server).await;
    carol.join("carol", server).await;
    for member in [&mut alice, &mut bob, &mut carol] {
        member.wait_for_roster(&["alice", "bob", "carol"]).await;
    }

    let mut carol_lines = Vec::new();
    for i in 0..10 {
        let sender = if i % 2 == 0 { &alice } else { &bob };
        sender.handle.send_chat(format!("message {i}")).await.unwrap();
        // Pace the senders so the server sees them in a known order.
        carol_lines.push(carol.wait_for_chat().await);
    }

    let mut received = vec![carol_lines];
    for member in [&mut alice, &mut bob] {
        let mut lines = Vec::new();
        for _ in 0..10 {
            lines.push(member.wait_for_chat().await);
        }
        received.push(lines);
    }

    let expected: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
    for lines in &received {
        let bodies: Vec<String> = lines.iter().map(|l| l.body.clone()).collect();
        assert_eq!(bodies, expected);
        let sequences: Vec<u64> = lines.iter().map(|l| l.sequence).collect();
        assert_eq!(sequences, (0..10).collect::<Vec<u64>>());
    }

    // No duplicates trail behind.
    for member in [&mut alice, &mut bob, &mut carol] {
        let extra = tokio::time::timeout(Duration::from_millis(100), async {
            while let Some(event) = member.events.recv().await {
                if let SessionEvent::ChatReceived(line) = event {
                    return Some(line);
                }
            }
            None
        })
        .await;
        assert!(
            !matches!(extra, Ok(Some(_))),
            "duplicate chat delivered: {extra:?}"
        );
    }
}

#[tokio::test]
async fn invalid_name_gets_an_explicit_rejection() {
    let server = server().await;
    let socket = UdpTransport::bind(localhost()).await.unwrap();

    let reply = exchange(
        &socket,
        server,
        &Message::JoinRequest {
            screen_name: "two words".to_string(),
        },
    )
    .await;
    assert_eq!(
        reply,
        Message::JoinRejected {
            reason: RejectReason::InvalidScreenName
        }
    );
}

#[tokio::test]
async fn vanished_member_is_evicted_and_its_name_freed() {
    let transport = UdpTransport::bind(localhost()).await.unwrap();
    let dispatcher = Dispatcher::new(transport, MemberRegistry::new())
        .with_member_timeout(Duration::from_millis(300));
    let server = dispatcher.local_addr().unwrap();
    let _server_task = tokio::spawn(dispatcher.run_until(std::future::pending()));

    let heartbeat = SessionConfig {
        heartbeat_interval: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let mut alice = client_with(heartbeat.clone());
    alice.join("alice", server).await;

    // A client that joins and then disappears without a word.
    let ghost = UdpTransport::bind(localhost()).await.unwrap();
    let reply = exchange(
        &ghost,
        server,
        &Message::JoinRequest {
            screen_name: "ghost".to_string(),
        },
    )
    .await;
    assert!(matches!(reply, Message::JoinAccepted { .. }));
    alice.wait_for_roster(&["alice", "ghost"]).await;
    drop(ghost);

    alice.wait_for_roster(&["alice"]).await;

    let mut newcomer = client_with(heartbeat);
    newcomer.join("ghost", server).await;
    newcomer.wait_for_roster(&["alice", "ghost"]).await;
    alice.wait_for_roster(&["alice", "ghost"]).await;
}

#[tokio::test]
async fn full_server_rejects_join() {
    let (server, _task) = start_server_with_registry(localhost(), MemberRegistry::with_capacity(1))
        .await
        .unwrap();
    let mut alice = client();
    let mut bob = client();

    alice.join("alice", server).await;

    bob.handle
        .connect("bob", "127.0.0.1", server.port())
        .await
        .unwrap();
    let failed = bob
        .wait_for("connect failure", |e| {
            matches!(e, SessionEvent::ConnectFailed(_))
        })
        .await;
    assert_eq!(failed, SessionEvent::ConnectFailed(ConnectFailure::ServerFull));

    // A slot frees up once alice leaves.
    alice.leave().await;
    bob.join("bob", server).await;
    bob.wait_for_roster(&["bob"]).await;
}

#[tokio::test]
async fn rejoin_after_leave_uses_a_fresh_roster() {
    let server = server().await;
    let mut alice = client();
    let mut bob = client();

    alice.join("alice", server).await;
    bob.join("bob", server).await;
    bob.wait_for_roster(&["alice", "bob"]).await;

    alice.leave().await;
    bob.wait_for_roster(&["bob"]).await;

    alice.join("alice", server).await;
    alice.wait_for_roster(&["bob", "alice"]).await;
    bob.wait_for_roster(&["bob", "alice"]).await;
}
