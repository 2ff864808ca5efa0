//! Client connection
//!
//! Connects both channels to the relay, then hands every inbound server
//! message to a queue the game loop drains once per tick.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{NetworkError, RelayError, Result};
use crate::net::buffer::MAX_PACKET_SIZE;
use crate::net::transport::{
    decode_datagram, encode_datagram, is_control_tag, write_frames, Control, MessageCodec,
};
use crate::protocol::{
    ChatRequest, ClientMessage, Identity, Message, MovementUpdate, SendMode, ServerMessage,
    MAX_CHAT_BYTES,
};

/// Interval between Bind datagrams while waiting for the ack
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Reliable messages queued before sends start failing
const OUTBOUND_QUEUE_SIZE: usize = 64;

/// How long `disconnect` waits for queued reliable messages to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type FrameReader = FramedRead<OwnedReadHalf, MessageCodec>;

/// Event delivered by the connection's reader tasks
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    /// The reliable channel closed; no further messages will arrive
    Closed,
}

/// A connection to the relay over both channels
pub struct ClientConnection {
    identity: Identity,
    datagrams: Arc<UdpSocket>,
    reliable_tx: Option<mpsc::Sender<Message>>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    readers: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// Connect to the configured relay.
    ///
    /// The whole handshake either completes within `connect_timeout_ms` or
    /// fails as a single error.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let ip: IpAddr = config
            .server_ip
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid server IP: {}", config.server_ip)))?;
        let control_addr = SocketAddr::new(ip, config.control_port);
        let data_addr = SocketAddr::new(ip, config.data_port);

        Self::connect_to(
            control_addr,
            data_addr,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .await
    }

    /// Connect to explicit channel addresses
    pub async fn connect_to(
        control_addr: SocketAddr,
        data_addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting to {} (data {})", control_addr, data_addr);

        match tokio::time::timeout(timeout, Self::handshake(control_addr, data_addr)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::ConnectFailed(format!(
                "no handshake from {} within {:?}",
                control_addr, timeout
            ))
            .into()),
        }
    }

    async fn handshake(control_addr: SocketAddr, data_addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(control_addr)
            .await
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, MessageCodec);
        let sink = FramedWrite::new(write_half, MessageCodec);

        let (identity, token) = match next_control(&mut frames).await? {
            Control::Welcome { identity, token } => (identity, token),
            other => {
                return Err(
                    NetworkError::HandshakeFailed(format!("expected welcome, got {:?}", other)).into(),
                )
            }
        };
        debug!(identity = identity, "Received welcome");

        let local_addr = match data_addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let datagrams = Arc::new(UdpSocket::bind(local_addr).await?);
        datagrams.connect(data_addr).await?;

        let bind = encode_datagram(&Control::Bind { identity, token }.to_message());
        let mut retry = tokio::time::interval(BIND_RETRY_INTERVAL);
        loop {
            tokio::select! {
                _ = retry.tick() => {
                    trace!(identity = identity, "Sending bind");
                    // ICMP errors from an earlier attempt surface here; keep retrying
                    if let Err(e) = datagrams.send(&bind).await {
                        debug!(identity = identity, error = %e, "Bind send failed");
                    }
                }
                control = next_control(&mut frames) => match control? {
                    Control::BindAck => break,
                    other => trace!(identity = identity, control = ?other, "Ignoring control message"),
                },
            }
        }
        info!(identity = identity, "Connected to relay");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (reliable_tx, reliable_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);

        let readers = vec![
            tokio::spawn(read_frames(frames, inbound_tx.clone())),
            tokio::spawn(read_datagrams(datagrams.clone(), inbound_tx)),
        ];
        let writer = tokio::spawn(write_frames(sink, reliable_rx, identity));

        Ok(Self {
            identity,
            datagrams,
            reliable_tx: Some(reliable_tx),
            inbound_rx,
            readers,
            writer: Some(writer),
        })
    }

    /// Identity the relay assigned to this client
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn is_open(&self) -> bool {
        self.reliable_tx
            .as_ref()
            .map_or(false, |tx| !tx.is_closed())
    }

    /// Send a message on the channel its kind requires, without blocking
    pub fn send(&self, message: &ClientMessage) -> std::result::Result<(), NetworkError> {
        let envelope = message.to_message();
        match message.send_mode() {
            SendMode::Reliable => {
                let tx = self.reliable_tx.as_ref().ok_or(NetworkError::ConnectionClosed)?;
                tx.try_send(envelope).map_err(|e| NetworkError::TransportFailure {
                    identity: self.identity,
                    reason: e.to_string(),
                })
            }
            SendMode::Unreliable => self
                .datagrams
                .try_send(&encode_datagram(&envelope))
                .map(|_| ())
                .map_err(|e| NetworkError::TransportFailure {
                    identity: self.identity,
                    reason: e.to_string(),
                }),
        }
    }

    pub fn send_movement(&self, update: MovementUpdate) -> std::result::Result<(), NetworkError> {
        self.send(&ClientMessage::Movement(update))
    }

    /// Send chat text; blank or over-long text is refused and nothing is sent
    pub fn send_chat(&self, text: &str) -> std::result::Result<bool, NetworkError> {
        if !chat_is_sendable(text) {
            return Ok(false);
        }
        self.send(&ClientMessage::Chat(ChatRequest {
            text: text.to_string(),
        }))?;
        Ok(true)
    }

    /// Next queued inbound event, if any
    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.inbound_rx.try_recv().ok()
    }

    /// Wait for the next inbound event
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound_rx.recv().await
    }

    /// Stop delivering inbound messages, flush queued reliable messages and
    /// close both channels
    pub async fn disconnect(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }

        // Dropping the sender lets the writer flush and close the stream
        self.reliable_tx.take();
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                debug!(identity = self.identity, "Writer did not drain in time");
            }
        }
        info!(identity = self.identity, "Disconnected from relay");
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("identity", &self.identity)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Whether chat text is worth sending and fits in one relayed frame
pub fn chat_is_sendable(text: &str) -> bool {
    !text.trim().is_empty() && text.len() <= MAX_CHAT_BYTES
}

/// Read frames until a handshake message arrives
async fn next_control(frames: &mut FrameReader) -> Result<Control> {
    loop {
        let message = match frames.next().await {
            Some(frame) => frame?,
            None => return Err(NetworkError::ConnectionClosed.into()),
        };
        if let Some(control) = Control::decode(&message)? {
            return Ok(control);
        }
        trace!(tag = message.tag(), "Ignoring message during handshake");
    }
}

/// Decode a server message, logging and dropping anything malformed
fn decode_inbound(message: &Message) -> Option<ServerMessage> {
    if is_control_tag(message.tag()) {
        return None;
    }
    match ServerMessage::decode(message) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(tag = message.tag(), error = %e, "Discarding undecodable message");
            None
        }
    }
}

async fn read_frames(mut frames: FrameReader, inbound: mpsc::UnboundedSender<Inbound>) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(message) => {
                if let Some(decoded) = decode_inbound(&message) {
                    if inbound.send(Inbound::Message(decoded)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Reliable channel framing error");
                break;
            }
        }
    }
    debug!("Reliable channel closed");
    let _ = inbound.send(Inbound::Closed);
}

async fn read_datagrams(socket: Arc<UdpSocket>, inbound: mpsc::UnboundedSender<Inbound>) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                trace!(error = %e, "Datagram receive error");
                continue;
            }
        };
        let message = match decode_datagram(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                trace!(error = %e, "Dropping undecodable datagram");
                continue;
            }
        };
        if let Some(decoded) = decode_inbound(&message) {
            if inbound.send(Inbound::Message(decoded)).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_is_sendable() {
        assert!(chat_is_sendable("hello"));
        assert!(!chat_is_sendable(""));
        assert!(!chat_is_sendable(" \t\n"));
        assert!(chat_is_sendable(&"a".repeat(MAX_CHAT_BYTES)));
        assert!(!chat_is_sendable(&"a".repeat(MAX_CHAT_BYTES + 1)));
    }
}
