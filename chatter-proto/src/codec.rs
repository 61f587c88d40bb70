//! Serialization and deserialization for the Chatter wire protocol.
//!
//! Messages are encoded with postcard: the [`Message`] variant index is
//! written as a varint kind discriminant, followed by the variant's fields.
//! Strings and the roster are varint-length-prefixed, so every message
//! round-trips exactly and one message fills one datagram.
//!
//! Decoding is strict. Anything the sender could have got wrong (unknown
//! kind, a length running past the buffer, trailing bytes, a bad screen
//! name outside a join request) is reported as [`CodecError::Malformed`]; the caller drops such
//! packets instead of failing.

use crate::message::Message;

/// Largest payload that fits in a single UDP datagram over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes do not form a valid message.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// The encoded message does not fit in one datagram.
    #[error("message too large: {size} bytes (max {MAX_DATAGRAM_SIZE})")]
    TooLarge {
        /// Encoded size in bytes.
        size: usize,
    },
}

/// Encodes a [`Message`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::TooLarge` if the encoded message exceeds
/// [`MAX_DATAGRAM_SIZE`], or `CodecError::Malformed` if serialization fails.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let bytes = postcard::to_allocvec(message).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge { size: bytes.len() });
    }
    Ok(bytes)
}

/// Decodes a [`Message`] from a datagram payload.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the payload is oversized, cannot be
/// deserialized, carries trailing bytes, or names an invalid screen name.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::Malformed(format!(
            "datagram of {} bytes exceeds {MAX_DATAGRAM_SIZE}",
            bytes.len()
        )));
    }

    let (message, rest) = postcard::take_from_bytes::<Message>(bytes)
        .map_err(|e| CodecError::Malformed(e.to_string()))?;
    if !rest.is_empty() {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after {}",
            rest.len(),
            message.kind()
        )));
    }

    message
        .validate()
        .map_err(|e| CodecError::Malformed(format!("{}: {e}", message.kind())))?;
    Ok(message)
}
