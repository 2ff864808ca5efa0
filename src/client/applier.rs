//! Remote state applier
//!
//! Client-side set of entities the relay has told us about. Spawn creates,
//! Movement overwrites, Disconnect destroys. Nothing is buffered: Movement for
//! an entity we have not seen spawn is dropped.

use std::collections::BTreeMap;

use glam::Vec3;
use tracing::{debug, trace};

use crate::protocol::{Identity, Transform};

/// One entity mirrored from the relay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteEntity {
    pub identity: Identity,
    pub transform: Transform,
    /// Whether this entity is driven by local input
    pub is_local: bool,
}

/// What applying one inbound message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new entity was created
    Spawned { identity: Identity, local: bool },
    /// Entity already existed; nothing changed
    DuplicateSpawn(Identity),
    /// Entity transform overwritten
    Moved(Identity),
    /// Entity removed
    Removed(Identity),
    /// No entity for this identity; nothing changed
    Ignored(Identity),
}

/// Mirror of the relay's player set
#[derive(Debug)]
pub struct RemoteStateApplier {
    local_identity: Identity,
    entities: BTreeMap<Identity, RemoteEntity>,
}

impl RemoteStateApplier {
    /// `local_identity` is the identity the server assigned to this client
    pub fn new(local_identity: Identity) -> Self {
        Self {
            local_identity,
            entities: BTreeMap::new(),
        }
    }

    /// Create an entity at `position`; duplicate spawns are ignored
    pub fn on_spawn(&mut self, identity: Identity, position: Vec3) -> ApplyOutcome {
        if self.entities.contains_key(&identity) {
            trace!(identity = identity, "Duplicate spawn ignored");
            return ApplyOutcome::DuplicateSpawn(identity);
        }

        let local = identity == self.local_identity;
        self.entities.insert(
            identity,
            RemoteEntity {
                identity,
                transform: Transform::at(position),
                is_local: local,
            },
        );

        debug!(identity = identity, local = local, position = ?position, "Entity spawned");
        ApplyOutcome::Spawned { identity, local }
    }

    /// Overwrite an entity's transform; unknown identities are ignored
    pub fn on_movement(&mut self, identity: Identity, position: Vec3, yaw: f32) -> ApplyOutcome {
        match self.entities.get_mut(&identity) {
            Some(entity) => {
                entity.transform = Transform::new(position, yaw);
                ApplyOutcome::Moved(identity)
            }
            None => {
                trace!(identity = identity, "Movement for unknown entity dropped");
                ApplyOutcome::Ignored(identity)
            }
        }
    }

    /// Mirror the local motion onto our own entity; no-op before it spawns
    pub fn set_local_transform(&mut self, transform: Transform) -> bool {
        match self.entities.get_mut(&self.local_identity) {
            Some(entity) => {
                entity.transform = transform;
                true
            }
            None => false,
        }
    }

    /// Destroy an entity; unknown identities are ignored
    pub fn on_disconnect(&mut self, identity: Identity) -> ApplyOutcome {
        match self.entities.remove(&identity) {
            Some(_) => {
                debug!(identity = identity, "Entity removed");
                ApplyOutcome::Removed(identity)
            }
            None => ApplyOutcome::Ignored(identity),
        }
    }

    pub fn entity(&self, identity: Identity) -> Option<&RemoteEntity> {
        self.entities.get(&identity)
    }

    /// The locally controlled entity, once its spawn has arrived
    pub fn local_entity(&self) -> Option<&RemoteEntity> {
        self.entities.get(&self.local_identity)
    }

    /// All entities in identity order
    pub fn entities(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.entities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_spawn_marks_local_entity() {
        let mut applier = RemoteStateApplier::new(2);

        assert_eq!(
            applier.on_spawn(1, Vec3::ZERO),
            ApplyOutcome::Spawned {
                identity: 1,
                local: false
            }
        );
        assert_eq!(
            applier.on_spawn(2, Vec3::Y),
            ApplyOutcome::Spawned {
                identity: 2,
                local: true
            }
        );
        assert_eq!(applier.local_entity().unwrap().transform.position, Vec3::Y);
    }

    #[test]
    fn test_duplicate_spawn_keeps_existing_transform() {
        let mut applier = RemoteStateApplier::new(0);
        applier.on_spawn(5, Vec3::ZERO);
        applier.on_movement(5, Vec3::new(3.0, 0.0, 3.0), 90.0);

        assert_eq!(applier.on_spawn(5, Vec3::ZERO), ApplyOutcome::DuplicateSpawn(5));
        assert_eq!(
            applier.entity(5).unwrap().transform,
            Transform::new(Vec3::new(3.0, 0.0, 3.0), 90.0)
        );
    }

    #[test]
    fn test_movement_before_spawn_is_dropped() {
        let mut applier = RemoteStateApplier::new(0);

        assert_eq!(
            applier.on_movement(9, Vec3::ONE, 10.0),
            ApplyOutcome::Ignored(9)
        );
        assert!(applier.is_empty());

        // The dropped movement is not replayed on a later spawn
        applier.on_spawn(9, Vec3::ZERO);
        assert_eq!(applier.entity(9).unwrap().transform, Transform::at(Vec3::ZERO));
    }

    #[test]
    fn test_disconnect_then_spawn_recreates() {
        let mut applier = RemoteStateApplier::new(0);
        applier.on_spawn(4, Vec3::ZERO);
        applier.on_movement(4, Vec3::splat(2.0), 45.0);

        assert_eq!(applier.on_disconnect(4), ApplyOutcome::Removed(4));
        assert!(applier.entity(4).is_none());

        // Identity reused by a new connection
        applier.on_spawn(4, Vec3::Y);
        assert_eq!(applier.entity(4).unwrap().transform, Transform::at(Vec3::Y));
    }

    #[test]
    fn test_disconnect_unknown_is_noop() {
        let mut applier = RemoteStateApplier::new(0);
        applier.on_spawn(1, Vec3::ZERO);

        assert_eq!(applier.on_disconnect(8), ApplyOutcome::Ignored(8));
        assert_eq!(applier.identities(), vec![1]);
    }

    #[test]
    fn test_set_local_transform_only_touches_local_entity() {
        let mut applier = RemoteStateApplier::new(3);
        let moved = Transform::new(Vec3::new(0.0, 1.0, 5.0), 30.0);
        assert!(!applier.set_local_transform(moved));

        applier.on_spawn(1, Vec3::ZERO);
        applier.on_spawn(3, Vec3::Y);
        assert!(applier.set_local_transform(moved));

        assert_eq!(applier.local_entity().unwrap().transform, moved);
        assert_eq!(applier.entity(1).unwrap().transform, Transform::at(Vec3::ZERO));
    }

    proptest! {
        #[test]
        fn prop_spawn_is_idempotent(
            spawns in prop::collection::vec((0u16..8, -50.0f32..50.0), 0..32)
        ) {
            let mut once = RemoteStateApplier::new(0);
            let mut twice = RemoteStateApplier::new(0);

            for (identity, x) in spawns {
                let position = Vec3::new(x, 1.0, 0.0);
                once.on_spawn(identity, position);
                twice.on_spawn(identity, position);
                twice.on_spawn(identity, position);
            }

            prop_assert_eq!(once.identities(), twice.identities());
            for entity in once.entities() {
                prop_assert_eq!(Some(entity), twice.entity(entity.identity));
            }
        }
    }
}
