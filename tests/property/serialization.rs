//! Property-based tests for the wire codec.
//!
//! Uses proptest to verify:
//! 1. Any valid `Message` survives an encode → decode round-trip.
//! 2. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 3. Every strict prefix of an encoded message is rejected.
//! 4. The first byte of an encoding is the kind discriminant.
//! 5. Join requests decode whatever their screen name, so the server can
//!    answer a bad one with a rejection.

use chatter_proto::codec;
use chatter_proto::message::{MAX_SCREEN_NAME_LEN, Message, RejectReason, validate_screen_name};
use proptest::prelude::*;

// --- Strategies for protocol types ---

/// Strategy for valid screen names.
fn arb_screen_name() -> impl Strategy<Value = String> {
    let pattern = format!("[a-zA-Z0-9_.éß-]{{1,{MAX_SCREEN_NAME_LEN}}}");
    proptest::string::string_regex(&pattern).expect("valid regex")
}

/// Strategy for chat bodies. Whitespace and newlines are allowed.
fn arb_body() -> impl Strategy<Value = String> {
    "(?s).{0,512}"
}

fn arb_reject_reason() -> impl Strategy<Value = RejectReason> {
    prop_oneof![
        Just(RejectReason::DuplicateName),
        Just(RejectReason::InvalidScreenName),
        Just(RejectReason::ServerFull),
    ]
}

/// Strategy for every valid `Message` variant.
fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        arb_screen_name().prop_map(|screen_name| Message::JoinRequest { screen_name }),
        prop::collection::vec(arb_screen_name(), 0..16)
            .prop_map(|roster| Message::JoinAccepted { roster }),
        arb_reject_reason().prop_map(|reason| Message::JoinRejected { reason }),
        arb_screen_name().prop_map(|screen_name| Message::MemberJoined { screen_name }),
        arb_screen_name().prop_map(|screen_name| Message::MemberLeft { screen_name }),
        (arb_screen_name(), arb_body()).prop_map(|(sender, body)| Message::Chat { sender, body }),
        arb_screen_name().prop_map(|screen_name| Message::LeaveRequest { screen_name }),
        arb_screen_name().prop_map(|screen_name| Message::LeaveAcknowledged { screen_name }),
        arb_screen_name().prop_map(|screen_name| Message::Heartbeat { screen_name }),
    ]
}

fn discriminant(message: &Message) -> u8 {
    match message {
        Message::JoinRequest { .. } => 0,
        Message::JoinAccepted { .. } => 1,
        Message::JoinRejected { .. } => 2,
        Message::MemberJoined { .. } => 3,
        Message::MemberLeft { .. } => 4,
        Message::Chat { .. } => 5,
        Message::LeaveRequest { .. } => 6,
        Message::LeaveAcknowledged { .. } => 7,
        Message::Heartbeat { .. } => 8,
    }
}

// --- Property tests ---

proptest! {
    /// Any valid message survives an encode → decode round-trip.
    #[test]
    fn message_round_trip(message in arb_message()) {
        let bytes = codec::encode(&message).expect("encode should succeed");
        let decoded = codec::decode(&bytes).expect("decode should succeed");
        prop_assert_eq!(message, decoded);
    }

    /// The encoding starts with the kind discriminant.
    #[test]
    fn first_byte_is_kind(message in arb_message()) {
        let bytes = codec::encode(&message).expect("encode should succeed");
        prop_assert_eq!(bytes[0], discriminant(&message));
    }

    /// Truncated datagrams never decode.
    #[test]
    fn strict_prefixes_are_rejected(message in arb_message()) {
        let bytes = codec::encode(&message).expect("encode should succeed");
        for len in 0..bytes.len() {
            prop_assert!(codec::decode(&bytes[..len]).is_err(), "prefix of {} bytes decoded", len);
        }
    }

    /// Random bytes never cause a panic when decoded.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    /// Whatever random bytes decode to is a valid message.
    #[test]
    fn decoded_messages_are_valid(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        if let Ok(message) = codec::decode(&bytes) {
            prop_assert!(message.validate().is_ok());
        }
    }

    /// Join requests reach the server with any name, valid or not.
    #[test]
    fn join_requests_decode_with_any_name(screen_name in "(?s).{0,64}") {
        let message = Message::JoinRequest { screen_name: screen_name.clone() };
        let bytes = codec::encode(&message).expect("encode should succeed");
        prop_assert_eq!(codec::decode(&bytes).expect("decode should succeed"), message);
        // Every other kind still refuses the same name when it is invalid.
        let left = codec::encode(&Message::MemberLeft { screen_name: screen_name.clone() })
            .expect("encode should succeed");
        prop_assert_eq!(
            codec::decode(&left).is_ok(),
            validate_screen_name(&screen_name).is_ok()
        );
    }
}
