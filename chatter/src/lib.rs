//! Chatter client library: the session state machine, its configuration
//! and the terminal front end.

pub mod config;
pub mod console;
pub mod session;
