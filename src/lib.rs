//! Relaysync Library
//!
//! An authoritative relay for real-time multiplayer sessions: clients send
//! their own transform and chat to the relay, which keeps the last-known
//! state of every player and fans updates out to everyone else.
//!
//! ## Modules
//!
//! - `client` - Client connection, remote state applier and send throttle
//! - `config` - Server and client configuration management
//! - `error` - Error types and result definitions
//! - `game` - Player state table and relay engine
//! - `net` - Framing, sessions and the relay server
//! - `protocol` - Wire protocol shared by both ends

pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::{ClientConfig, ServerConfig};
pub use error::{RelayError, Result};
pub use net::server::RelayServer;
pub use state::ServerState;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
