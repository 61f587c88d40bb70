//! Shared protocol definitions for the Chatter wire format and the
//! datagram transport both binaries speak it over.

pub mod codec;
pub mod message;
pub mod transport;
