//! Generation-checked entity handles.
//!
//! A Bevy [`Entity`] is an (index, generation) pair, so a handle kept across
//! ticks can be checked against the world before use. A despawned target
//! resolves to [`HandleError::Expired`] even if its slot was reused.

use std::collections::HashMap;

use bevy_ecs::prelude::*;

use crate::replication::NetworkId;

/// Why a handle could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// The referenced entity was despawned.
    #[error("entity {0:?} has expired")]
    Expired(Entity),

    /// No entity was ever registered under this network id.
    #[error("no entity registered for {0:?}")]
    Unknown(NetworkId),

    /// The entity exists but lacks the requested component.
    #[error("entity {0:?} does not carry the requested component")]
    MissingComponent(Entity),
}

/// A non-owning reference to another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakEntity(Entity);

impl WeakEntity {
    /// Wraps `entity`.
    pub fn new(entity: Entity) -> Self {
        Self(entity)
    }

    /// The raw handle, without a validity check.
    pub fn entity(&self) -> Entity {
        self.0
    }

    /// Returns `true` while the target is still alive in `world`.
    pub fn is_alive(&self, world: &World) -> bool {
        world.get_entity(self.0).is_ok()
    }

    /// Resolves to the live entity.
    pub fn upgrade(&self, world: &World) -> Result<Entity, HandleError> {
        if self.is_alive(world) {
            Ok(self.0)
        } else {
            Err(HandleError::Expired(self.0))
        }
    }

    /// Resolves and borrows component `T` of the target.
    pub fn get<'w, T: Component>(&self, world: &'w World) -> Result<&'w T, HandleError> {
        let entity = self.upgrade(world)?;
        world
            .get::<T>(entity)
            .ok_or(HandleError::MissingComponent(entity))
    }
}

impl From<Entity> for WeakEntity {
    fn from(entity: Entity) -> Self {
        Self(entity)
    }
}

/// Authority-side map from [`NetworkId`] to the local [`Entity`].
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    by_id: HashMap<NetworkId, Entity>,
    by_entity: HashMap<Entity, NetworkId>,
}

impl NetworkRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `entity` under `id`.
    pub fn insert(&mut self, id: NetworkId, entity: Entity) {
        self.by_id.insert(id, entity);
        self.by_entity.insert(entity, id);
    }

    /// Forgets `id`.
    pub fn remove(&mut self, id: NetworkId) -> Option<Entity> {
        let entity = self.by_id.remove(&id)?;
        self.by_entity.remove(&entity);
        Some(entity)
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_entity.clear();
    }

    /// Resolves `id` to a live entity.
    pub fn resolve(&self, world: &World, id: NetworkId) -> Result<Entity, HandleError> {
        let entity = *self.by_id.get(&id).ok_or(HandleError::Unknown(id))?;
        WeakEntity(entity).upgrade(world)
    }

    /// Reverse lookup.
    pub fn network_id(&self, entity: Entity) -> Option<NetworkId> {
        self.by_entity.get(&entity).copied()
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
