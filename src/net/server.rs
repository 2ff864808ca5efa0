//! Relay server
//!
//! Owns both listeners and runs the accept loop for the reliable channel
//! alongside the receive loop for the unreliable one.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tracing::{error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{NetworkError, Result};
use crate::game::relay::RelayEngine;
use crate::net::buffer::MAX_PACKET_SIZE;
use crate::net::handler::ConnectionHandler;
use crate::state::ServerState;

/// Bound relay server, ready to run
pub struct RelayServer {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind both channels as configured
    pub async fn bind(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let control_addr = socket_addr(&config.bind_address, config.control_port)?;
        let data_addr = socket_addr(&config.bind_address, config.data_port)?;

        let listener = TcpListener::bind(control_addr).await?;
        let datagrams = Arc::new(UdpSocket::bind(data_addr).await?);

        info!("Reliable channel listening on: {}", listener.local_addr()?);
        info!("Unreliable channel listening on: {}", datagrams.local_addr()?);

        Ok(Self {
            state: Arc::new(ServerState::new(config, datagrams, shutdown_tx)),
            listener,
        })
    }

    /// Address of the reliable (TCP) listener
    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the unreliable (UDP) socket
    pub fn data_addr(&self) -> Result<SocketAddr> {
        Ok(self.state.datagrams.local_addr()?)
    }

    pub fn relay(&self) -> Arc<RelayEngine> {
        self.state.relay.clone()
    }

    /// Serve until a shutdown signal arrives
    pub async fn run(self) {
        let handler = ConnectionHandler::new(self.state.clone());

        let datagram_handler = handler.clone();
        let datagrams = self.state.datagrams.clone();
        let mut datagram_shutdown_rx = self.state.shutdown_tx.subscribe();
        let datagram_handle = tokio::spawn(async move {
            receive_datagrams(datagrams, datagram_handler, &mut datagram_shutdown_rx).await;
        });

        let mut accept_shutdown_rx = self.state.shutdown_tx.subscribe();
        accept_connections(self.listener, handler, &mut accept_shutdown_rx).await;

        let _ = datagram_handle.await;
        info!(
            sessions = self.state.session_manager.count(),
            "Relay server stopped"
        );
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(host.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

/// Accept incoming reliable-channel connections
async fn accept_connections(
    listener: TcpListener,
    handler: ConnectionHandler,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New connection from: {}", addr);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_tcp(stream, addr).await {
                                warn!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Receive datagrams on the unreliable channel
async fn receive_datagrams(
    socket: Arc<UdpSocket>,
    handler: ConnectionHandler,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, addr)) => handler.handle_datagram(&buf[..len], addr),
                    // ICMP unreachable from a departed client surfaces here on some platforms
                    Err(e) => trace!("Datagram receive error: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Datagram receiver shutting down");
                break;
            }
        }
    }
}
