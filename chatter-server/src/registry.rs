//! Member registry for the membership server.
//!
//! The authoritative set of joined screen names and their return
//! addresses, kept in join order. The registry is owned by the dispatch
//! loop and only ever mutated through `&mut self`, so a check-and-insert
//! in [`MemberRegistry::try_join`] cannot interleave with another join.
//!
//! Entries are ephemeral: everything is lost on server restart. Each
//! member carries the time it was last heard from, so members whose client
//! vanished without leaving can be expired.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use chatter_proto::codec::{self, CodecError};
use chatter_proto::message::{Message, RejectReason, Roster, validate_screen_name};
use chatter_proto::transport::{Transport, TransportError};

/// Default maximum number of members the registry will hold.
pub const DEFAULT_MAX_MEMBERS: usize = 256;

/// A joined chat member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Unique screen name.
    pub screen_name: String,
    /// Endpoint the member's datagrams come from and replies go to.
    pub address: SocketAddr,
    /// When the member's endpoint last sent a join, chat or heartbeat.
    pub last_seen: Instant,
}

/// Errors that can occur when joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The screen name is already registered.
    #[error("screen name already in use")]
    DuplicateName,
    /// The screen name is not valid.
    #[error("invalid screen name")]
    InvalidScreenName,
    /// The registry has reached its capacity.
    #[error("registry is full (max {max} members)")]
    ServerFull {
        /// Configured capacity.
        max: usize,
    },
}

impl JoinError {
    /// The wire-level reason sent back in `JoinRejected`.
    #[must_use]
    pub const fn reason(&self) -> RejectReason {
        match self {
            Self::DuplicateName => RejectReason::DuplicateName,
            Self::InvalidScreenName => RejectReason::InvalidScreenName,
            Self::ServerFull { .. } => RejectReason::ServerFull,
        }
    }
}

/// In-memory, insertion-ordered member directory.
#[derive(Debug)]
pub struct MemberRegistry {
    members: Vec<Member>,
    max_members: usize,
}

impl Default for MemberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberRegistry {
    /// Creates an empty registry with the default capacity.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_MEMBERS)
    }

    /// Creates an empty registry holding at most `max_members` members.
    #[must_use]
    pub const fn with_capacity(max_members: usize) -> Self {
        Self {
            members: Vec::new(),
            max_members,
        }
    }

    /// Registers `screen_name` at `address` and returns the new roster.
    ///
    /// The registry is left untouched on error.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidScreenName`], [`JoinError::DuplicateName`]
    /// or [`JoinError::ServerFull`].
    pub fn try_join(&mut self, screen_name: &str, address: SocketAddr) -> Result<Roster, JoinError> {
        validate_screen_name(screen_name).map_err(|_| JoinError::InvalidScreenName)?;

        if self.get(screen_name).is_some() {
            return Err(JoinError::DuplicateName);
        }
        if self.members.len() >= self.max_members {
            return Err(JoinError::ServerFull {
                max: self.max_members,
            });
        }

        self.members.push(Member {
            screen_name: screen_name.to_string(),
            address,
            last_seen: Instant::now(),
        });
        Ok(self.snapshot())
    }

    /// Removes a member. Removing an absent name is a no-op and returns `None`.
    pub fn leave(&mut self, screen_name: &str) -> Option<Member> {
        let index = self
            .members
            .iter()
            .position(|m| m.screen_name == screen_name)?;
        Some(self.members.remove(index))
    }

    /// Records activity for `screen_name` if `from` is the endpoint that
    /// owns it. Returns whether a member was refreshed.
    pub fn touch(&mut self, screen_name: &str, from: SocketAddr) -> bool {
        match self
            .members
            .iter_mut()
            .find(|m| m.screen_name == screen_name && m.address == from)
        {
            Some(member) => {
                member.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes every member not heard from within `idle` and returns them
    /// in join order.
    pub fn expire_idle(&mut self, idle: Duration) -> Vec<Member> {
        let now = Instant::now();
        let (expired, kept) = std::mem::take(&mut self.members)
            .into_iter()
            .partition(|m| now.saturating_duration_since(m.last_seen) >= idle);
        self.members = kept;
        expired
    }

    /// Looks up a member by screen name.
    #[must_use]
    pub fn get(&self, screen_name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.screen_name == screen_name)
    }

    /// Point-in-time copy of member names in join order.
    #[must_use]
    pub fn snapshot(&self) -> Roster {
        self.members.iter().map(|m| m.screen_name.clone()).collect()
    }

    /// Number of registered members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no one is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sends `message` to every member except `excluding`.
    ///
    /// The message is encoded once. Send failures are logged; the names of
    /// members whose endpoint reported [`TransportError::Unreachable`] are
    /// returned so the caller can evict them.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the message cannot be encoded, in which
    /// case nothing is sent.
    pub async fn broadcast<T: Transport>(
        &self,
        transport: &T,
        message: &Message,
        excluding: Option<&str>,
    ) -> Result<Vec<String>, CodecError> {
        let bytes = codec::encode(message)?;
        let mut unreachable = Vec::new();

        for member in &self.members {
            if excluding == Some(member.screen_name.as_str()) {
                continue;
            }
            match transport.send(member.address, &bytes).await {
                Ok(()) => {}
                Err(TransportError::Unreachable(addr)) => {
                    tracing::warn!(
                        screen_name = %member.screen_name,
                        peer = %addr,
                        kind = message.kind(),
                        "member unreachable during broadcast"
                    );
                    unreachable.push(member.screen_name.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        screen_name = %member.screen_name,
                        error = %e,
                        kind = message.kind(),
                        "broadcast send failed"
                    );
                }
            }
        }

        Ok(unreachable)
    }
}
