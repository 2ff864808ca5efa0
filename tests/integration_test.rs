//! Integration tests for the relay over real sockets
//!
//! These tests boot a relay server on loopback with ephemeral ports and
//! verify end-to-end behavior of:
//! - Connect, spawn and the late-joiner roster
//! - Movement relay with sender exclusion
//! - Chat echo
//! - Disconnect notification

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

use relaysync::client::{ClientConnection, ClientState, GameClient, Inbound, InputCommand};
use relaysync::config::{ClientConfig, ServerConfig};
use relaysync::error::{NetworkError, RelayError};
use relaysync::game::relay::RelayEngine;
use relaysync::game::SPAWN_POSITION;
use relaysync::protocol::{
    ChatBroadcast, ChatRequest, ClientMessage, DisconnectPacket, MovementBroadcast,
    MovementUpdate, Packet, ServerMessage, SpawnPacket, MAX_CHAT_BYTES,
};
use relaysync::RelayServer;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    relay: Arc<RelayEngine>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let server = RelayServer::bind(ServerConfig::loopback_ephemeral(), shutdown_tx.clone())
            .await
            .expect("server should bind");

        let test_server = Self {
            control_addr: server.control_addr().unwrap(),
            data_addr: server.data_addr().unwrap(),
            relay: server.relay(),
            shutdown_tx,
        };
        tokio::spawn(server.run());
        test_server
    }

    async fn connect(&self) -> ClientConnection {
        ClientConnection::connect_to(self.control_addr, self.data_addr, WAIT)
            .await
            .expect("client should connect")
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_ip: self.control_addr.ip().to_string(),
            control_port: self.control_addr.port(),
            data_port: self.data_addr.port(),
            ..ClientConfig::default()
        }
    }

    /// Poll the relay until `check` holds
    async fn wait_for(&self, check: impl Fn(&RelayEngine) -> bool) {
        let deadline = Instant::now() + WAIT;
        while !check(&self.relay) {
            assert!(Instant::now() < deadline, "relay never reached expected state");
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn next_message(connection: &mut ClientConnection) -> ServerMessage {
    match timeout(WAIT, connection.recv()).await {
        Ok(Some(Inbound::Message(message))) => message,
        Ok(Some(Inbound::Closed)) | Ok(None) => panic!("connection closed unexpectedly"),
        Err(_) => panic!("timed out waiting for a message"),
    }
}

/// Every message that arrives within `window`
async fn collect_for(connection: &mut ClientConnection, window: Duration) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    let deadline = Instant::now() + window;
    while let Ok(Some(Inbound::Message(message))) =
        timeout(deadline.saturating_duration_since(Instant::now()), connection.recv()).await
    {
        messages.push(message);
    }
    messages
}

fn spawn(identity: u16) -> ServerMessage {
    ServerMessage::Spawn(SpawnPacket {
        identity,
        position: SPAWN_POSITION,
    })
}

/// Tick `client` until `check` holds
async fn tick_until(client: &mut GameClient, check: impl Fn(&GameClient) -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check(client) {
        assert!(Instant::now() < deadline, "client never reached expected state");
        client.tick(0.02);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Two clients: spawn, movement relay, disconnect
#[tokio::test]
async fn test_end_to_end_relay() {
    let server = TestServer::start().await;

    // A connects and sees its own spawn
    let mut a = server.connect().await;
    let a_id = a.identity();
    assert_eq!(next_message(&mut a).await, spawn(a_id));

    let mut a_view = ClientState::from_config(a_id, &ClientConfig::default());
    a_view.apply(spawn(a_id));

    // B connects: both see B's spawn, B also learns about A
    let mut b = server.connect().await;
    let b_id = b.identity();
    assert_ne!(a_id, b_id);

    assert_eq!(next_message(&mut b).await, spawn(b_id));
    assert_eq!(next_message(&mut b).await, spawn(a_id));

    let b_spawn = next_message(&mut a).await;
    assert_eq!(b_spawn, spawn(b_id));
    a_view.apply(b_spawn);
    assert!(a_view.entities().entity(b_id).is_some());

    // A moves: B hears about it, A does not hear its own movement back
    let update = MovementUpdate {
        position: Vec3::new(3.0, 1.0, 4.0),
        yaw: 90.0,
    };
    let expected = ServerMessage::Movement(MovementBroadcast {
        identity: a_id,
        position: update.position,
        yaw: update.yaw,
    });

    // Unreliable channel: resend until one arrives
    let mut received = None;
    for _ in 0..20 {
        a.send_movement(update).unwrap();
        let messages = collect_for(&mut b, Duration::from_millis(100)).await;
        if let Some(message) = messages.into_iter().find(|m| *m == expected) {
            received = Some(message);
            break;
        }
    }
    assert_eq!(received, Some(expected));

    let echoed = collect_for(&mut a, Duration::from_millis(200)).await;
    assert!(
        echoed
            .iter()
            .all(|m| !matches!(m, ServerMessage::Movement(_))),
        "sender received its own movement: {:?}",
        echoed
    );

    let state = server.relay.player(a_id).unwrap();
    assert_eq!(state.position, update.position);
    assert_eq!(state.yaw, update.yaw);

    // B leaves: A is told and drops B's entity
    b.disconnect().await;
    assert_eq!(
        next_message(&mut a).await,
        ServerMessage::Disconnect(DisconnectPacket { identity: b_id })
    );
    a_view.apply(ServerMessage::Disconnect(DisconnectPacket { identity: b_id }));
    assert!(a_view.entities().entity(b_id).is_none());

    server.wait_for(|relay| relay.connected() == vec![a_id]).await;
    assert!(server.relay.player(b_id).is_none());

    a.disconnect().await;
    server.wait_for(|relay| relay.player_count() == 0).await;
    server.shutdown();
}

/// Late joiners see existing players at their last-known position, chat is echoed
#[tokio::test]
async fn test_late_joiner_and_chat() {
    let server = TestServer::start().await;
    let config = server.client_config();

    let mut a = GameClient::connect(&config).await.expect("A should connect");
    let a_id = a.identity();
    tick_until(&mut a, |c| c.state().is_local_bound()).await;

    // Walk A forward until the relay records the move
    let deadline = Instant::now() + WAIT;
    loop {
        let moved = server
            .relay
            .player(a_id)
            .map_or(false, |state| state.position.z > 0.5);
        if moved {
            break;
        }
        assert!(Instant::now() < deadline, "relay never saw A move");
        a.state_mut().push_input(InputCommand::Move {
            strafe: 0.0,
            forward: 1.0,
        });
        a.tick(0.02);
        sleep(Duration::from_millis(10)).await;
    }

    let mut b = GameClient::connect(&config).await.expect("B should connect");
    let b_id = b.identity();
    tick_until(&mut b, |c| {
        c.state().is_local_bound() && c.state().entities().entity(a_id).is_some()
    })
    .await;

    // B's roster entry for A is A's last-known position, not the spawn point
    let a_seen_by_b = b.state().entities().entity(a_id).unwrap().transform.position;
    assert!(a_seen_by_b.z > 0.5, "roster used spawn position: {:?}", a_seen_by_b);
    assert!(!b.state().entities().entity(a_id).unwrap().is_local);
    assert!(b.state().entities().entity(b_id).unwrap().is_local);

    // Blank chat is refused client-side
    assert_eq!(b.send_chat("   "), Ok(false));
    assert_eq!(b.send_chat("hello"), Ok(true));

    let line = format!("Player {}: hello", b_id);
    tick_until(&mut a, |c| c.state().chat().render() == line).await;
    tick_until(&mut b, |c| c.state().chat().render() == line).await;

    a.disconnect().await;
    tick_until(&mut b, |c| c.state().entities().entity(a_id).is_none()).await;

    b.disconnect().await;
    server.wait_for(|relay| relay.player_count() == 0).await;
    server.shutdown();
}

/// A failed connect is reported once and not retried
#[tokio::test]
async fn test_connect_failure() {
    // Grab a free port, then close it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = ClientConnection::connect_to(addr, addr, Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(RelayError::Network(NetworkError::ConnectFailed(_)))
    ));
}

/// Datagrams from an address that never bound are dropped
#[tokio::test]
async fn test_unbound_datagrams_are_ignored() {
    let server = TestServer::start().await;
    let mut a = server.connect().await;
    let a_id = a.identity();
    assert_eq!(next_message(&mut a).await, spawn(a_id));

    let stranger = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let movement = relaysync::net::transport::encode_datagram(
        &MovementUpdate {
            position: Vec3::splat(50.0),
            yaw: 0.0,
        }
        .to_message(),
    );
    stranger.send_to(&movement, server.data_addr).await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.relay.player(a_id).unwrap().position, SPAWN_POSITION);
    assert_eq!(server.relay.player_count(), 1);

    server.shutdown();
}

/// An over-long chat is dropped by the relay without cutting anyone's stream
#[tokio::test]
async fn test_oversized_chat_keeps_reliable_channel_open() {
    let server = TestServer::start().await;

    let mut a = server.connect().await;
    let a_id = a.identity();
    assert_eq!(next_message(&mut a).await, spawn(a_id));

    let mut b = server.connect().await;
    let b_id = b.identity();
    assert_eq!(next_message(&mut b).await, spawn(b_id));
    assert_eq!(next_message(&mut b).await, spawn(a_id));
    assert_eq!(next_message(&mut a).await, spawn(b_id));

    // The client refuses it outright
    let oversized = "a".repeat(MAX_CHAT_BYTES + 1);
    assert_eq!(a.send_chat(&oversized), Ok(false));

    // Forced onto the wire, the relay discards it
    a.send(&ClientMessage::Chat(ChatRequest { text: oversized }))
        .unwrap();
    assert_eq!(a.send_chat("hi"), Ok(true));

    let expected = ServerMessage::Chat(ChatBroadcast {
        sender: a_id,
        text: "hi".to_string(),
    });
    assert_eq!(next_message(&mut b).await, expected);
    assert_eq!(next_message(&mut a).await, expected);
    assert!(a.is_open());
    assert!(b.is_open());

    server.shutdown();
}

/// Refused Bind datagrams are retried until the ack arrives
#[tokio::test]
async fn test_bind_retries_through_refused_datagrams() {
    use bytes::BytesMut;
    use relaysync::net::transport::{Control, MessageCodec};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Encoder;

    // Nobody listens on this UDP port, so loopback sends come back refused
    let closed = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let data_addr = closed.local_addr().unwrap();
    drop(closed);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_addr = listener.local_addr().unwrap();
    let relay = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut frames = BytesMut::new();
        MessageCodec
            .encode(Control::Welcome { identity: 7, token: 1 }.to_message(), &mut frames)
            .unwrap();
        stream.write_all(&frames).await.unwrap();

        // Let several Bind attempts fail before acknowledging
        sleep(Duration::from_millis(350)).await;
        let mut ack = BytesMut::new();
        MessageCodec.encode(Control::BindAck.to_message(), &mut ack).unwrap();
        stream.write_all(&ack).await.unwrap();
        stream
    });

    let connection = ClientConnection::connect_to(control_addr, data_addr, WAIT)
        .await
        .expect("handshake should survive refused datagrams");
    assert_eq!(connection.identity(), 7);
    drop(relay.await.unwrap());
}
