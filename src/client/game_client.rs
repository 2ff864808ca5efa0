//! Game client module
//!
//! Contains the client's per-tick loop: apply what the relay sent, move the
//! local player, then decide whether to tell the relay about it.

use tracing::{debug, info, warn};

use crate::client::applier::{ApplyOutcome, RemoteStateApplier};
use crate::client::chat::ChatLog;
use crate::client::connection::{ClientConnection, Inbound};
use crate::client::input::{InputCommand, InputGate};
use crate::client::motion::{KinematicMotion, LocalMotion};
use crate::client::throttle::SendThrottle;
use crate::config::ClientConfig;
use crate::error::{NetworkError, Result};
use crate::protocol::{Identity, MovementUpdate, ServerMessage, Transform};

/// Everything the client knows about the world, independent of the network
#[derive(Debug)]
pub struct ClientState<M: LocalMotion = KinematicMotion> {
    applier: RemoteStateApplier,
    throttle: SendThrottle,
    chat: ChatLog,
    input: InputGate,
    motion: M,
}

impl ClientState<KinematicMotion> {
    pub fn from_config(identity: Identity, config: &ClientConfig) -> Self {
        Self::new(
            identity,
            SendThrottle::from_config(config),
            ChatLog::new(config.chat_history_lines),
            KinematicMotion::from_config(config),
        )
    }
}

impl<M: LocalMotion> ClientState<M> {
    pub fn new(identity: Identity, throttle: SendThrottle, chat: ChatLog, motion: M) -> Self {
        Self {
            applier: RemoteStateApplier::new(identity),
            throttle,
            chat,
            input: InputGate::new(),
            motion,
        }
    }

    /// Apply one message from the relay.
    ///
    /// Returns `None` for chat, which does not touch the entity set.
    pub fn apply(&mut self, message: ServerMessage) -> Option<ApplyOutcome> {
        match message {
            ServerMessage::Spawn(spawn) => {
                let outcome = self.applier.on_spawn(spawn.identity, spawn.position);
                if let ApplyOutcome::Spawned { local: true, .. } = outcome {
                    // Bind local motion to our own entity
                    self.motion.place(Transform::at(spawn.position));
                    self.throttle.reset(self.motion.transform());
                    info!(identity = spawn.identity, position = ?spawn.position, "Local player spawned");
                }
                Some(outcome)
            }
            ServerMessage::Movement(movement) => Some(self.applier.on_movement(
                movement.identity,
                movement.position,
                movement.yaw,
            )),
            ServerMessage::Chat(chat) => {
                self.chat.push_chat(chat.sender, &chat.text);
                None
            }
            ServerMessage::Disconnect(disconnect) => {
                Some(self.applier.on_disconnect(disconnect.identity))
            }
        }
    }

    /// Integrate local motion and run the send throttle.
    ///
    /// Returns the Movement to send, if any. Does nothing until the local
    /// player has spawned.
    pub fn step(&mut self, dt: f32) -> Option<MovementUpdate> {
        let commands = self.input.drain();
        if !self.is_local_bound() {
            return None;
        }
        self.motion.integrate(&commands, dt);
        self.applier.set_local_transform(self.motion.transform());
        self.throttle
            .poll(self.motion.transform(), self.input.is_enabled())
    }

    /// One tick: apply `inbound` in arrival order, then integrate local
    /// motion, then run the send throttle
    pub fn advance<I>(&mut self, inbound: I, dt: f32) -> Option<MovementUpdate>
    where
        I: IntoIterator<Item = ServerMessage>,
    {
        for message in inbound {
            self.apply(message);
        }
        self.step(dt)
    }

    /// Whether our own Spawn has arrived
    pub fn is_local_bound(&self) -> bool {
        self.throttle.is_active()
    }

    pub fn push_input(&mut self, command: InputCommand) {
        self.input.push(command);
    }

    pub fn set_input_enabled(&mut self, enabled: bool) {
        self.input.set_enabled(enabled);
    }

    pub fn local_transform(&self) -> Transform {
        self.motion.transform()
    }

    pub fn entities(&self) -> &RemoteStateApplier {
        &self.applier
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Inbound messages applied this tick
    pub applied: usize,
    /// Whether a Movement was sent
    pub sent_movement: bool,
    /// Whether the relay closed the connection
    pub disconnected: bool,
}

/// Networked game client
pub struct GameClient<M: LocalMotion = KinematicMotion> {
    connection: ClientConnection,
    state: ClientState<M>,
    connected: bool,
}

impl GameClient<KinematicMotion> {
    /// Connect to the configured relay
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let connection = ClientConnection::connect(config).await?;
        let state = ClientState::from_config(connection.identity(), config);
        Ok(Self::new(connection, state))
    }
}

impl<M: LocalMotion> GameClient<M> {
    pub fn new(connection: ClientConnection, state: ClientState<M>) -> Self {
        Self {
            connection,
            state,
            connected: true,
        }
    }

    pub fn identity(&self) -> Identity {
        self.connection.identity()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn state(&self) -> &ClientState<M> {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ClientState<M> {
        &mut self.state
    }

    /// Run one simulation tick of `dt` seconds.
    ///
    /// Inbound messages are applied in arrival order before local motion is
    /// integrated, never during it.
    pub fn tick(&mut self, dt: f32) -> TickReport {
        let mut report = TickReport::default();
        let mut inbound = Vec::new();

        while let Some(event) = self.connection.try_recv() {
            match event {
                Inbound::Message(message) => inbound.push(message),
                Inbound::Closed => {
                    if self.connected {
                        warn!(identity = self.identity(), "Relay closed the connection");
                    }
                    self.connected = false;
                    report.disconnected = true;
                }
            }
        }
        report.applied = inbound.len();

        if let Some(update) = self.state.advance(inbound, dt) {
            match self.connection.send_movement(update) {
                Ok(()) => report.sent_movement = true,
                Err(e) => debug!(error = %e, "Movement send failed"),
            }
        }

        report
    }

    /// Send chat text; blank or over-long text is refused
    pub fn send_chat(&self, text: &str) -> std::result::Result<bool, NetworkError> {
        self.connection.send_chat(text)
    }

    /// Leave the relay
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
        self.connected = false;
    }
}
