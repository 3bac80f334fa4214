//! Pure Rust async client for the Quake / DarkPlaces remote console (rcon),
//! server status and master server queries, plus a ping utility.
//!
//! Secure rcon relies on HMAC-MD4. MD4 is legacy crypto required by the
//! protocol and offers no real protection on its own.
pub mod client;
pub mod clock;
pub mod config;
pub mod dns;
pub mod error;
pub mod master;
pub mod packet;
pub mod ping;
pub mod stats;
pub mod status;

pub use client::Client;
pub use error::{RconError, Result};
pub use packet::SecureRcon;
