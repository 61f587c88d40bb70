//! Wire format message types for the Chatter membership protocol.
//!
//! Every datagram exchanged between a client and the membership server
//! carries exactly one [`Message`]. The variant index acts as the kind
//! discriminant on the wire; see [`crate::codec`] for the byte layout.

use serde::{Deserialize, Serialize};

/// Maximum length of a screen name in characters.
pub const MAX_SCREEN_NAME_LEN: usize = 32;

/// Member screen names in join order.
pub type Roster = Vec<String>;

/// Why the server refused a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// Another member already uses the requested screen name.
    DuplicateName,
    /// The requested screen name is empty, too long, or contains whitespace.
    InvalidScreenName,
    /// The server has reached its member capacity.
    ServerFull,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "screen name already in use"),
            Self::InvalidScreenName => write!(f, "invalid screen name"),
            Self::ServerFull => write!(f, "server is full"),
        }
    }
}

/// A single protocol message.
///
/// Client → server: `JoinRequest`, `Chat`, `LeaveRequest`, `Heartbeat`.
/// Server → client: `JoinAccepted`, `JoinRejected`, `MemberJoined`,
/// `MemberLeft`, `Chat`, `LeaveAcknowledged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask to join the chat room under a screen name.
    JoinRequest {
        /// Requested screen name.
        screen_name: String,
    },

    /// The join succeeded.
    JoinAccepted {
        /// Current members in join order, including the new member.
        roster: Roster,
    },

    /// The join was refused.
    JoinRejected {
        /// Why the server refused.
        reason: RejectReason,
    },

    /// Another member joined the room.
    MemberJoined {
        /// Screen name of the new member.
        screen_name: String,
    },

    /// A member left the room (or was evicted as unreachable).
    MemberLeft {
        /// Screen name of the departed member.
        screen_name: String,
    },

    /// A chat line. Clients send it to the server; the server relays it to
    /// every member, the sender included.
    Chat {
        /// Screen name of the author.
        sender: String,
        /// Message text.
        body: String,
    },

    /// Ask to leave the room.
    LeaveRequest {
        /// Screen name of the leaving member.
        screen_name: String,
    },

    /// The server processed a leave request.
    LeaveAcknowledged {
        /// Screen name echoed from the request.
        screen_name: String,
    },

    /// Periodic liveness signal from a joined member. Members that stay
    /// silent past the server's idle timeout are evicted.
    Heartbeat {
        /// Screen name of the member.
        screen_name: String,
    },
}

impl Message {
    /// Short kind name, used in log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest { .. } => "JoinRequest",
            Self::JoinAccepted { .. } => "JoinAccepted",
            Self::JoinRejected { .. } => "JoinRejected",
            Self::MemberJoined { .. } => "MemberJoined",
            Self::MemberLeft { .. } => "MemberLeft",
            Self::Chat { .. } => "Chat",
            Self::LeaveRequest { .. } => "LeaveRequest",
            Self::LeaveAcknowledged { .. } => "LeaveAcknowledged",
            Self::Heartbeat { .. } => "Heartbeat",
        }
    }

    /// Checks every screen name carried by this message.
    ///
    /// The name in a `JoinRequest` is left to the server, which answers an
    /// unacceptable one with `JoinRejected { InvalidScreenName }`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ScreenNameError`] found.
    pub fn validate(&self) -> Result<(), ScreenNameError> {
        match self {
            Self::MemberJoined { screen_name }
            | Self::MemberLeft { screen_name }
            | Self::LeaveRequest { screen_name }
            | Self::LeaveAcknowledged { screen_name }
            | Self::Heartbeat { screen_name } => validate_screen_name(screen_name),
            Self::Chat { sender, .. } => validate_screen_name(sender),
            Self::JoinAccepted { roster } => roster
                .iter()
                .try_for_each(|name| validate_screen_name(name)),
            Self::JoinRequest { .. } | Self::JoinRejected { .. } => Ok(()),
        }
    }
}

/// Error returned when a screen name is not acceptable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScreenNameError {
    /// The name is empty.
    #[error("screen name is empty")]
    Empty,
    /// The name is longer than [`MAX_SCREEN_NAME_LEN`] characters.
    #[error("screen name too long ({len} chars, max {MAX_SCREEN_NAME_LEN})")]
    TooLong {
        /// Actual length in characters.
        len: usize,
    },
    /// The name contains a whitespace character.
    #[error("screen name cannot contain whitespace")]
    Whitespace,
}

/// Validates a screen name: non-empty, at most [`MAX_SCREEN_NAME_LEN`]
/// characters, no whitespace.
///
/// # Errors
///
/// Returns the [`ScreenNameError`] describing the first violated rule.
pub fn validate_screen_name(name: &str) -> Result<(), ScreenNameError> {
    if name.is_empty() {
        return Err(ScreenNameError::Empty);
    }
    let len = name.chars().count();
    if len > MAX_SCREEN_NAME_LEN {
        return Err(ScreenNameError::TooLong { len });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ScreenNameError::Whitespace);
    }
    Ok(())
}
