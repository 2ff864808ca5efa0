//! Connection handler module
//!
//! Handles the lifecycle of client connections:
//! - Reliable stream setup and the outbound writer task
//! - Handshake (Welcome, datagram Bind, BindAck)
//! - Registration with the relay once both channels are up
//! - Routing inbound frames and datagrams to the relay
//! - Cleanup on disconnect

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::error::{NetworkError, Result};
use crate::game::relay::MessageOutcome;
use crate::net::session::{ConnectionState, Session};
use crate::net::transport::{decode_datagram, is_control_tag, write_frames, Control, MessageCodec};
use crate::protocol::{Identity, Message};
use crate::state::ServerState;

/// Reliable messages queued per connection before sends start failing
const OUTBOUND_QUEUE_SIZE: usize = 256;

/// How long the writer gets to flush after the connection ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type FrameReader = FramedRead<OwnedReadHalf, MessageCodec>;

/// Connection handler for processing client connections
#[derive(Clone)]
pub struct ConnectionHandler {
    /// Shared server state
    state: Arc<ServerState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Handle an accepted reliable-channel connection until it closes
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");

        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, MessageCodec);
        let sink = FramedWrite::new(write_half, MessageCodec);

        let (reliable_tx, reliable_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let session = self.state.session_manager.create_session(
            addr,
            reliable_tx,
            self.state.datagrams.clone(),
        )?;
        let identity = session.identity;

        let writer = tokio::spawn(write_frames(sink, reliable_rx, identity));

        let result = self.handle_connection(&mut frames, &session).await;

        // Cleanup
        debug!(identity = identity, "Connection handler ending");
        self.state.relay.on_disconnect(identity);
        self.state.session_manager.remove(identity);

        // The writer stops once the last sender (held by the session) is gone
        drop(session);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            trace!(identity = identity, "Writer did not drain in time");
        }

        result
    }

    /// Handshake, then relay frames until the stream ends
    async fn handle_connection(&self, frames: &mut FrameReader, session: &Arc<Session>) -> Result<()> {
        let identity = session.identity;
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        session.send_control(Control::Welcome {
            identity,
            token: session.token,
        })?;

        self.await_binding(frames, session, &mut shutdown_rx).await?;

        session.send_control(Control::BindAck)?;
        session.set_state(ConnectionState::Connected);

        if !self.state.relay.on_connect(identity, session.clone()) {
            return Err(NetworkError::HandshakeFailed(format!(
                "identity {} already registered",
                identity
            ))
            .into());
        }

        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(message)) => self.dispatch(identity, &message),
                    Some(Err(e)) => {
                        warn!(identity = identity, error = %e, "Closing connection on framing error");
                        return Err(e);
                    }
                    None => {
                        debug!(identity = identity, "Connection closed by client");
                        return Ok(());
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!(identity = identity, "Connection closing for shutdown");
                    return Ok(());
                }
            }
        }
    }

    /// Wait for the client to bind its datagram address
    async fn await_binding(
        &self,
        frames: &mut FrameReader,
        session: &Session,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let deadline = tokio::time::sleep(Duration::from_secs(self.state.config.bind_timeout_secs));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = session.wait_bound() => {
                    debug!(identity = session.identity, "Datagram channel bound");
                    return Ok(());
                }
                frame = frames.next() => match frame {
                    Some(Ok(message)) => {
                        trace!(identity = session.identity, tag = message.tag(), "Ignoring frame before binding");
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(NetworkError::ConnectionClosed.into()),
                },
                _ = &mut deadline => {
                    return Err(NetworkError::HandshakeFailed("datagram bind timed out".to_string()).into());
                }
                _ = shutdown_rx.recv() => return Err(NetworkError::ConnectionClosed.into()),
            }
        }
    }

    /// Route one inbound message to the relay
    fn dispatch(&self, identity: Identity, message: &Message) {
        if is_control_tag(message.tag()) {
            trace!(identity = identity, tag = message.tag(), "Ignoring control message");
            return;
        }

        match self.state.relay.on_message(identity, message) {
            MessageOutcome::Relayed { delivered, failed } => {
                trace!(
                    identity = identity,
                    tag = message.tag(),
                    delivered = delivered,
                    failed = failed,
                    "Message relayed"
                );
            }
            MessageOutcome::Discarded | MessageOutcome::UnknownSender => {}
        }
    }

    /// Handle one datagram received on the unreliable socket
    pub fn handle_datagram(&self, datagram: &[u8], addr: SocketAddr) {
        let message = match decode_datagram(datagram) {
            Ok(message) => message,
            Err(e) => {
                trace!(address = %addr, error = %e, "Dropping undecodable datagram");
                return;
            }
        };

        if is_control_tag(message.tag()) {
            match Control::decode(&message) {
                Ok(Some(Control::Bind { identity, token })) => {
                    self.state
                        .session_manager
                        .bind_datagrams(identity, token, addr);
                }
                Ok(_) => trace!(address = %addr, tag = message.tag(), "Unexpected control datagram"),
                Err(e) => trace!(address = %addr, error = %e, "Dropping bad control datagram"),
            }
            return;
        }

        match self.state.session_manager.identity_for_datagram(&addr) {
            Some(identity) => self.dispatch(identity, &message),
            None => trace!(address = %addr, "Datagram from unbound address dropped"),
        }
    }
}
