//! Player state table
//!
//! Server-side record of every connected player's last-known transform.
//! Records live in an arena indexed directly by connection identity and are
//! only ever replaced whole; callers always receive copies.

use glam::Vec3;

use crate::protocol::{wrap_degrees, Identity};

/// Position new players spawn at
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 1.0, 0.0);

/// Last-known state of one connected player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub identity: Identity,
    pub position: Vec3,
    /// Degrees, wrapped to [0, 360)
    pub yaw: f32,
}

impl PlayerState {
    /// Create a record, wrapping yaw into [0, 360)
    pub fn new(identity: Identity, position: Vec3, yaw: f32) -> Self {
        Self {
            identity,
            position,
            yaw: wrap_degrees(yaw),
        }
    }

    /// Record for a freshly connected player
    pub fn spawned(identity: Identity) -> Self {
        Self::new(identity, SPAWN_POSITION, 0.0)
    }
}

/// Arena of player records indexed by identity
#[derive(Debug, Default)]
pub struct PlayerStateTable {
    slots: Vec<Option<PlayerState>>,
    len: usize,
}

impl PlayerStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `identity`
    pub fn upsert(&mut self, identity: Identity, position: Vec3, yaw: f32) {
        let index = identity as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }

        let slot = &mut self.slots[index];
        if slot.is_none() {
            self.len += 1;
        }
        *slot = Some(PlayerState::new(identity, position, yaw));
    }

    /// Delete the record for `identity`; no-op if absent
    pub fn remove(&mut self, identity: Identity) -> Option<PlayerState> {
        let removed = self
            .slots
            .get_mut(identity as usize)
            .and_then(|slot| slot.take());

        if removed.is_some() {
            self.len -= 1;
            // Keep the arena no longer than its highest live identity
            while matches!(self.slots.last(), Some(None)) {
                self.slots.pop();
            }
        }
        removed
    }

    /// Copy of the record for `identity`
    pub fn get(&self, identity: Identity) -> Option<PlayerState> {
        self.slots.get(identity as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies of all records, in identity order
    pub fn snapshot(&self) -> Vec<PlayerState> {
        self.slots.iter().flatten().copied().collect()
    }

    /// All identities that have a record, in ascending order
    pub fn identities(&self) -> Vec<Identity> {
        self.slots
            .iter()
            .flatten()
            .map(|state| state.identity)
            .collect()
    }
}
