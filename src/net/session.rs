//! Session management module
//!
//! Manages client connections including:
//! - Identity allocation (unique while connected, reusable afterwards)
//! - Connection state machine (connecting -> connected -> disconnected)
//! - Datagram address binding for the unreliable channel
//! - The outbound link the relay broadcasts through

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::error::NetworkError;
use crate::game::relay::PeerLink;
use crate::net::transport::{encode_datagram, Control};
use crate::protocol::{Identity, Message, SendMode};

/// Connection state in the session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, waiting for the datagram binding
    Connecting,
    /// Both channels up and registered with the relay
    Connected,
    /// Terminal
    Disconnected,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected client
pub struct Session {
    /// Connection identity
    pub identity: Identity,
    /// Remote address of the reliable stream
    pub address: SocketAddr,
    /// Token the client must present to bind its datagram address
    pub token: u32,
    /// Time of session creation
    pub created_at: Instant,
    state: RwLock<ConnectionState>,
    datagram_address: RwLock<Option<SocketAddr>>,
    bound: Notify,
    /// Reliable outbound queue, drained by the connection's writer task
    reliable_tx: mpsc::Sender<Message>,
    /// Shared unreliable socket
    datagrams: Arc<UdpSocket>,
}

impl Session {
    pub fn new(
        identity: Identity,
        address: SocketAddr,
        token: u32,
        reliable_tx: mpsc::Sender<Message>,
        datagrams: Arc<UdpSocket>,
    ) -> Self {
        Self {
            identity,
            address,
            token,
            created_at: Instant::now(),
            state: RwLock::new(ConnectionState::Connecting),
            datagram_address: RwLock::new(None),
            bound: Notify::new(),
            reliable_tx,
            datagrams,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Move to `new_state`; a disconnected session stays disconnected
    pub fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            if old != ConnectionState::Disconnected {
                *state = new_state;
            }
            old
        };
        debug!(
            identity = self.identity,
            old_state = %old_state,
            new_state = %self.state(),
            "Connection state changed"
        );
    }

    pub fn datagram_address(&self) -> Option<SocketAddr> {
        *self.datagram_address.read()
    }

    /// Resolve once the datagram address has been bound
    pub async fn wait_bound(&self) {
        if self.datagram_address().is_some() {
            return;
        }
        self.bound.notified().await;
    }

    fn bind_datagrams(&self, address: SocketAddr) {
        *self.datagram_address.write() = Some(address);
        self.bound.notify_one();
    }

    /// Queue a handshake message on the reliable channel
    pub fn send_control(&self, control: Control) -> Result<(), NetworkError> {
        self.send_reliable(control.to_message())
    }

    fn send_reliable(&self, message: Message) -> Result<(), NetworkError> {
        self.reliable_tx.try_send(message).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "reliable queue full",
                mpsc::error::TrySendError::Closed(_) => "connection closed",
            };
            NetworkError::TransportFailure {
                identity: self.identity,
                reason: reason.to_string(),
            }
        })
    }

    fn send_unreliable(&self, message: &Message) -> Result<(), NetworkError> {
        let address = self
            .datagram_address()
            .ok_or_else(|| NetworkError::TransportFailure {
                identity: self.identity,
                reason: "no datagram binding".to_string(),
            })?;

        self.datagrams
            .try_send_to(&encode_datagram(message), address)
            .map(|_| ())
            .map_err(|e| NetworkError::TransportFailure {
                identity: self.identity,
                reason: e.to_string(),
            })
    }
}

impl PeerLink for Session {
    fn send(&self, message: &Message, mode: SendMode) -> Result<(), NetworkError> {
        match mode {
            SendMode::Reliable => self.send_reliable(message.clone()),
            SendMode::Unreliable => self.send_unreliable(message),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("datagram_address", &self.datagram_address())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Thread-safe session registry
pub struct SessionManager {
    /// Live sessions by identity
    sessions: DashMap<Identity, Arc<Session>>,
    /// Bound datagram addresses
    datagram_to_identity: DashMap<SocketAddr, Identity>,
    /// Next identity to try
    next_identity: AtomicU16,
    /// Maximum simultaneous sessions
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            datagram_to_identity: DashMap::new(),
            next_identity: AtomicU16::new(0),
            max_sessions: max_sessions.min(Identity::MAX as usize + 1),
        }
    }

    /// Allocate an identity and register a new session under it.
    ///
    /// Identities come from a wrapping counter and skip any still live, so a
    /// released identity is only handed out again after the counter wraps.
    pub fn create_session(
        &self,
        address: SocketAddr,
        reliable_tx: mpsc::Sender<Message>,
        datagrams: Arc<UdpSocket>,
    ) -> Result<Arc<Session>, NetworkError> {
        if self.sessions.len() >= self.max_sessions {
            warn!(
                address = %address,
                max = self.max_sessions,
                "Session limit reached"
            );
            return Err(NetworkError::NoFreeIdentity);
        }

        for _ in 0..=Identity::MAX as u32 {
            let candidate = self.next_identity.fetch_add(1, Ordering::SeqCst);
            if let Entry::Vacant(slot) = self.sessions.entry(candidate) {
                let session = Arc::new(Session::new(
                    candidate,
                    address,
                    rand::random(),
                    reliable_tx,
                    datagrams,
                ));
                slot.insert(session.clone());

                info!(identity = candidate, address = %address, "Session created");
                return Ok(session);
            }
        }

        Err(NetworkError::NoFreeIdentity)
    }

    pub fn get(&self, identity: Identity) -> Option<Arc<Session>> {
        self.sessions.get(&identity).map(|r| r.clone())
    }

    /// Bind a datagram address to a session if the token matches
    pub fn bind_datagrams(&self, identity: Identity, token: u32, address: SocketAddr) -> bool {
        let Some(session) = self.get(identity) else {
            debug!(identity = identity, address = %address, "Bind for unknown identity");
            return false;
        };

        if session.token != token {
            warn!(identity = identity, address = %address, "Bind with wrong token");
            return false;
        }

        if session.datagram_address() != Some(address) {
            if let Some(previous) = session.datagram_address() {
                self.datagram_to_identity.remove(&previous);
            }
            self.datagram_to_identity.insert(address, identity);
            session.bind_datagrams(address);
            debug!(identity = identity, address = %address, "Datagram address bound");
        }
        true
    }

    /// Identity owning a bound datagram address
    pub fn identity_for_datagram(&self, address: &SocketAddr) -> Option<Identity> {
        self.datagram_to_identity.get(address).map(|r| *r)
    }

    /// Remove a session and its datagram binding
    pub fn remove(&self, identity: Identity) {
        if let Some((_, session)) = self.sessions.remove(&identity) {
            if let Some(address) = session.datagram_address() {
                self.datagram_to_identity
                    .remove_if(&address, |_, owner| *owner == identity);
            }
            session.set_state(ConnectionState::Disconnected);

            info!(
                identity = identity,
                lifetime = ?session.created_at.elapsed(),
                "Session removed"
            );
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::decode_datagram;
    use crate::protocol::{DisconnectPacket, Packet};

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    async fn test_socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    #[tokio::test]
    async fn test_session_manager_allocates_unique_identities() {
        let manager = SessionManager::new(8);
        let socket = test_socket().await;
        let (tx, _rx) = mpsc::channel(4);

        let a = manager
            .create_session(test_address(), tx.clone(), socket.clone())
            .unwrap();
        let b = manager
            .create_session(test_address(), tx, socket)
            .unwrap();

        assert_eq!(a.identity, 0);
        assert_eq!(b.identity, 1);
        assert_eq!(manager.count(), 2);
        assert_eq!(a.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let manager = SessionManager::new(1);
        let socket = test_socket().await;
        let (tx, _rx) = mpsc::channel(4);

        assert!(manager
            .create_session(test_address(), tx.clone(), socket.clone())
            .is_ok());
        assert_eq!(
            manager
                .create_session(test_address(), tx, socket)
                .unwrap_err(),
            NetworkError::NoFreeIdentity
        );
    }

    #[tokio::test]
    async fn test_identity_skips_live_sessions_after_wrap() {
        let manager = SessionManager::new(8);
        let socket = test_socket().await;
        let (tx, _rx) = mpsc::channel(4);

        let first = manager
            .create_session(test_address(), tx.clone(), socket.clone())
            .unwrap();
        assert_eq!(first.identity, 0);

        // Force the counter to wrap onto the live identity 0
        manager.next_identity.store(Identity::MAX, Ordering::SeqCst);
        let last = manager
            .create_session(test_address(), tx.clone(), socket.clone())
            .unwrap();
        let next = manager
            .create_session(test_address(), tx, socket)
            .unwrap();

        assert_eq!(last.identity, Identity::MAX);
        assert_eq!(next.identity, 1);
    }

    #[tokio::test]
    async fn test_bind_requires_token() {
        let manager = SessionManager::new(8);
        let socket = test_socket().await;
        let (tx, _rx) = mpsc::channel(4);
        let session = manager.create_session(test_address(), tx, socket).unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        assert!(!manager.bind_datagrams(session.identity, session.token.wrapping_add(1), peer));
        assert_eq!(manager.identity_for_datagram(&peer), None);

        assert!(manager.bind_datagrams(session.identity, session.token, peer));
        assert_eq!(manager.identity_for_datagram(&peer), Some(session.identity));
        session.wait_bound().await;

        manager.remove(session.identity);
        assert_eq!(manager.identity_for_datagram(&peer), None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reliable_send_uses_queue() {
        let socket = test_socket().await;
        let (tx, mut rx) = mpsc::channel(1);
        let session = Session::new(5, test_address(), 1, tx, socket);

        let message = DisconnectPacket { identity: 2 }.to_message();
        session.send(&message, SendMode::Reliable).unwrap();
        assert!(matches!(
            session.send(&message, SendMode::Reliable),
            Err(NetworkError::TransportFailure { identity: 5, .. })
        ));
        assert_eq!(rx.recv().await, Some(message));
    }

    #[tokio::test]
    async fn test_unreliable_send_needs_binding() {
        let socket = test_socket().await;
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(5, test_address(), 1, tx, socket.clone());
        let message = DisconnectPacket { identity: 2 }.to_message();

        assert!(session.send(&message, SendMode::Unreliable).is_err());

        socket.writable().await.unwrap();
        session.bind_datagrams(receiver.local_addr().unwrap());
        session.send(&message, SendMode::Unreliable).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(decode_datagram(&buf[..len]).unwrap(), message);
    }

    #[tokio::test]
    async fn test_disconnected_is_terminal() {
        let socket = test_socket().await;
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(1, test_address(), 1, tx, socket);

        session.set_state(ConnectionState::Connected);
        session.set_state(ConnectionState::Disconnected);
        session.set_state(ConnectionState::Connected);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
