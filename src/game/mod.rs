//! Game state module
//!
//! Server-side authority over who is connected and where they are.

pub mod player_table;
pub mod relay;

pub use player_table::{PlayerState, PlayerStateTable, SPAWN_POSITION};
pub use relay::{MessageOutcome, PeerLink, RelayEngine};
