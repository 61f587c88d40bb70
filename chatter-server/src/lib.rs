//! Chatter membership server library.
//!
//! Exposes the dispatcher and member registry for use in tests and
//! embedding. The server listens on a single UDP welcome port, keeps the
//! roster of joined members, relays chat to all of them, and acknowledges
//! leave requests.

pub mod config;
pub mod dispatcher;
pub mod registry;
