//! Client module
//!
//! The client half of the relay:
//! - `connection` - both channels to the relay and the inbound queue
//! - `applier` - mirror of the relay's player set
//! - `throttle` - when local movement is worth sending
//! - `motion` / `input` - the locally controlled player
//! - `chat` - bounded chat history
//! - `game_client` - the per-tick loop tying these together

pub mod applier;
pub mod chat;
pub mod connection;
pub mod game_client;
pub mod input;
pub mod motion;
pub mod throttle;

pub use applier::{ApplyOutcome, RemoteEntity, RemoteStateApplier};
pub use chat::ChatLog;
pub use connection::{ClientConnection, Inbound};
pub use game_client::{ClientState, GameClient, TickReport};
pub use input::{InputCommand, InputGate};
pub use motion::{KinematicMotion, LocalMotion};
pub use throttle::SendThrottle;
