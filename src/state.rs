//! Server state module
//!
//! Contains the shared state used across all relay connections.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::game::relay::RelayEngine;
use crate::net::session::SessionManager;

/// State shared by every connection handler
pub struct ServerState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager for tracking connected clients
    pub session_manager: SessionManager,
    /// Relay engine owning the player state table
    pub relay: Arc<RelayEngine>,
    /// Unreliable channel socket, shared by every session
    pub datagrams: Arc<UdpSocket>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        datagrams: Arc<UdpSocket>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let session_manager = SessionManager::new(config.max_clients as usize);
        Self {
            config,
            session_manager,
            relay: Arc::new(RelayEngine::new()),
            datagrams,
            shutdown_tx,
        }
    }
}
