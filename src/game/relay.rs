//! Relay engine
//!
//! Reacts to connect, disconnect and message events from the transport,
//! keeps the player state table current and decides which connections
//! receive which broadcast:
//! - Spawn goes to everyone (including the newcomer), reliable
//! - Movement goes to everyone except its sender, unreliable
//! - Chat goes to everyone (echoing the sender), reliable
//! - Disconnect goes to everyone still connected, reliable
//!
//! The table and the set of registered connections sit behind one mutex, and
//! every broadcast is fanned out while holding it, so no broadcast ever sees
//! a half-updated client set. Sends are non-blocking; a failed recipient is
//! logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::NetworkError;
use crate::game::player_table::{PlayerState, PlayerStateTable};
use crate::protocol::{
    ChatBroadcast, ClientMessage, DisconnectPacket, Identity, Message, MovementBroadcast, Packet,
    SendMode, SpawnPacket,
};

/// Outbound half of one connection, as seen by the relay
pub trait PeerLink: Send + Sync {
    /// Queue a message for delivery without blocking
    fn send(&self, message: &Message, mode: SendMode) -> Result<(), NetworkError>;
}

/// What the relay did with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Decoded and relayed to this many recipients
    Relayed { delivered: usize, failed: usize },
    /// Failed to decode; dropped
    Discarded,
    /// Sender has no registered handler; dropped
    UnknownSender,
}

/// Delivery counts for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct RelayInner {
    table: PlayerStateTable,
    peers: BTreeMap<Identity, Arc<dyn PeerLink>>,
}

impl RelayInner {
    fn broadcast(
        &self,
        message: &Message,
        mode: SendMode,
        except: Option<Identity>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (&identity, link) in &self.peers {
            if Some(identity) == except {
                continue;
            }
            match link.send(message, mode) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        identity = identity,
                        tag = message.tag(),
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }

        report
    }
}

/// Server-side relay state machine
#[derive(Default)]
pub struct RelayEngine {
    inner: Mutex<RelayInner>,
}

impl RelayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a transport-level connect.
    ///
    /// Creates the player's record at the spawn point, broadcasts its Spawn to
    /// every connection including the new one, sends the newcomer one Spawn
    /// per player already present, then registers the newcomer's handler.
    /// Returns `false` if `identity` is already registered.
    pub fn on_connect(&self, identity: Identity, link: Arc<dyn PeerLink>) -> bool {
        let mut inner = self.inner.lock();

        if inner.peers.contains_key(&identity) {
            warn!(identity = identity, "Connect for an identity already registered");
            return false;
        }

        let state = PlayerState::spawned(identity);
        inner.table.upsert(identity, state.position, state.yaw);
        inner.peers.insert(identity, link.clone());

        let spawn = SpawnPacket {
            identity,
            position: state.position,
        };
        let report = inner.broadcast(&spawn.to_message(), SpawnPacket::send_mode(), None);

        // Late joiners learn about everyone already in the world
        for existing in inner.table.snapshot() {
            if existing.identity == identity {
                continue;
            }
            let roster = SpawnPacket {
                identity: existing.identity,
                position: existing.position,
            };
            if let Err(e) = link.send(&roster.to_message(), SpawnPacket::send_mode()) {
                warn!(
                    identity = identity,
                    existing = existing.identity,
                    error = %e,
                    "Roster delivery failed"
                );
            }
        }

        info!(
            identity = identity,
            players = inner.table.len(),
            delivered = report.delivered,
            "Client connected"
        );
        true
    }

    /// Handle one inbound message from `sender`.
    ///
    /// Decode failures are logged and discarded; they never disconnect the
    /// sender.
    pub fn on_message(&self, sender: Identity, message: &Message) -> MessageOutcome {
        let decoded = match ClientMessage::decode(message) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    identity = sender,
                    tag = message.tag(),
                    error = %e,
                    "Discarding undecodable message"
                );
                return MessageOutcome::Discarded;
            }
        };

        let mut inner = self.inner.lock();

        if !inner.peers.contains_key(&sender) {
            trace!(identity = sender, "Message from unregistered identity ignored");
            return MessageOutcome::UnknownSender;
        }

        let report = match decoded {
            ClientMessage::Movement(update) => {
                // Last write wins; client positions are not validated
                inner.table.upsert(sender, update.position, update.yaw);
                let yaw = inner.table.get(sender).map_or(update.yaw, |state| state.yaw);

                let broadcast = MovementBroadcast {
                    identity: sender,
                    position: update.position,
                    yaw,
                };
                trace!(identity = sender, position = ?update.position, yaw = yaw, "Movement");
                inner.broadcast(
                    &broadcast.to_message(),
                    MovementBroadcast::send_mode(),
                    Some(sender),
                )
            }
            ClientMessage::Chat(request) => {
                debug!(identity = sender, text = %request.text, "Chat");
                let broadcast = ChatBroadcast {
                    sender,
                    text: request.text,
                };
                inner.broadcast(&broadcast.to_message(), ChatBroadcast::send_mode(), None)
            }
        };

        MessageOutcome::Relayed {
            delivered: report.delivered,
            failed: report.failed,
        }
    }

    /// Handle a transport-level disconnect.
    ///
    /// Unregisters the handler, removes the record and tells every remaining
    /// connection. Unknown identities are a silent no-op.
    pub fn on_disconnect(&self, identity: Identity) -> bool {
        let mut inner = self.inner.lock();

        let had_peer = inner.peers.remove(&identity).is_some();
        let had_state = inner.table.remove(identity).is_some();
        if !had_peer && !had_state {
            trace!(identity = identity, "Disconnect for unknown identity ignored");
            return false;
        }

        let packet = DisconnectPacket { identity };
        let report = inner.broadcast(&packet.to_message(), DisconnectPacket::send_mode(), None);

        info!(
            identity = identity,
            players = inner.table.len(),
            delivered = report.delivered,
            "Client disconnected"
        );
        true
    }

    /// Copy of one player's record
    pub fn player(&self, identity: Identity) -> Option<PlayerState> {
        self.inner.lock().table.get(identity)
    }

    /// Identities with a registered handler
    pub fn connected(&self) -> Vec<Identity> {
        self.inner.lock().peers.keys().copied().collect()
    }

    pub fn player_count(&self) -> usize {
        self.inner.lock().table.len()
    }
}
