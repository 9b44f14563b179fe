//! Minimal async client for the MPD line protocol
//!
//! This crate speaks just enough of the protocol for mpdex: a greeting
//! handshake, `key: value` responses terminated by `OK`, `ACK` errors, and
//! the handful of commands the indexer and playlist tracker use. It keeps no
//! state beyond the socket and never retries; recovery is the caller's job.

mod address;
mod connection;
mod error;
mod response;

pub use address::{MpdAddress, DEFAULT_PORT};
pub use connection::{quote, MpdConnection};
pub use error::MpdError;
pub use response::Attrs;
