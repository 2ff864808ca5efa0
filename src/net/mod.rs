//! Networking module
//!
//! This module handles the server's transport concerns:
//! - Byte buffers and length-prefixed framing
//! - Session management and identity allocation
//! - Connection lifecycle and the handshake binding both channels
//! - The listeners themselves

pub mod buffer;
pub mod handler;
pub mod server;
pub mod session;
pub mod transport;
