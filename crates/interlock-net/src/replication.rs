//! Replicated property store: schema-driven field replication from the
//! authority to every observer.
//!
//! Each replicated field is a Bevy [`Component`] registered in a
//! [`ReplicationSet`] together with its [`FieldSpec`]: a stable tag, a
//! visibility rule ([`ReplicationCondition`]) and an optional change hook.
//! Each tick the [`ReplicationServerSystem`] diffs the serialized field
//! values against per-client shadow state and emits [`SpawnEntity`],
//! [`EntityUpdate`] and [`DespawnEntity`] messages. The
//! [`ReplicationClientSystem`] applies them to the observer's world and runs
//! each field's notify hook once per observed change.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;

use bevy_ecs::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Network identifier for a replicated entity, allocated by the authority
/// from a monotonically increasing counter. Observers reference entities
/// exclusively by `NetworkId`.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u64);

/// Identity of a session participant (one per connection).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

/// The participant an entity belongs to. Fields registered with
/// [`ReplicationCondition::SkipOwner`] are never sent to this participant.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetOwner(pub ParticipantId);

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Which observers receive a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationCondition {
    /// Every observer.
    #[default]
    All,
    /// Every observer except the entity's [`NetOwner`].
    SkipOwner,
}

/// Change hook run on the receiving participant after a field changed.
pub type NotifyFn = fn(&mut World, Entity);

/// Declarative description of one replicated field.
#[derive(Clone, Copy)]
pub struct FieldSpec {
    /// Stable tag used on the wire.
    pub tag: &'static str,
    /// Visibility rule.
    pub condition: ReplicationCondition,
    /// Optional change hook.
    pub notify: Option<NotifyFn>,
}

impl FieldSpec {
    /// A field replicated to everyone without a change hook.
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            condition: ReplicationCondition::All,
            notify: None,
        }
    }

    /// Do not replay the field to the entity's owner.
    pub fn skip_owner(mut self) -> Self {
        self.condition = ReplicationCondition::SkipOwner;
        self
    }

    /// Run `hook` on the observer whenever a new value arrives.
    pub fn with_notify(mut self, hook: NotifyFn) -> Self {
        self.notify = Some(hook);
        self
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("tag", &self.tag)
            .field("condition", &self.condition)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

/// Outcome of writing received bytes into a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldWrite {
    Changed,
    Unchanged,
    Rejected,
}

/// Type-erased accessors for one registered field.
struct FieldDescriptor {
    spec: FieldSpec,
    serializer: fn(&World, Entity) -> Option<Vec<u8>>,
    deserializer: fn(&mut World, Entity, &[u8]) -> FieldWrite,
}

/// The replication schema: which components propagate and how.
#[derive(Default)]
pub struct ReplicationSet {
    descriptors: Vec<FieldDescriptor>,
}

impl ReplicationSet {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers component `T` as a replicated field. A second registration
    /// under an existing tag is ignored.
    pub fn register<T>(&mut self, spec: FieldSpec) -> &mut Self
    where
        T: Component + Serialize + DeserializeOwned + PartialEq,
    {
        if self.field(spec.tag).is_some() {
            warn!(tag = spec.tag, "replicated field registered twice; keeping the first");
            return self;
        }
        self.descriptors.push(FieldDescriptor {
            spec,
            serializer: |world, entity| {
                world
                    .get::<T>(entity)
                    .and_then(|c| postcard::to_allocvec(c).ok())
            },
            deserializer: |world, entity, bytes| {
                let Ok(value) = postcard::from_bytes::<T>(bytes) else {
                    return FieldWrite::Rejected;
                };
                let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
                    return FieldWrite::Rejected;
                };
                if entity_mut.get::<T>() == Some(&value) {
                    return FieldWrite::Unchanged;
                }
                entity_mut.insert(value);
                FieldWrite::Changed
            },
        });
        self
    }

    /// Returns the spec registered under `tag`.
    pub fn field(&self, tag: &str) -> Option<&FieldSpec> {
        self.descriptor(tag).map(|d| &d.spec)
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no field is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn descriptor(&self, tag: &str) -> Option<&FieldDescriptor> {
        self.descriptors.iter().find(|d| d.spec.tag == tag)
    }
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// A tag identifying a field in serialized messages.
pub type FieldTag = String;

/// Changed fields on an entity the observer already knows about.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    /// The entity's network identifier.
    pub network_id: NetworkId,
    /// Authority tick that produced the update.
    pub tick: u64,
    /// Only the fields whose value changed since the last send.
    pub changed_fields: Vec<(FieldTag, Vec<u8>)>,
}

/// Full field snapshot for an entity the observer has not seen yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpawnEntity {
    /// The entity's network identifier.
    pub network_id: NetworkId,
    /// Every field visible to this observer.
    pub fields: Vec<(FieldTag, Vec<u8>)>,
}

/// The entity no longer exists on the authority.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DespawnEntity {
    /// The entity's network identifier.
    pub network_id: NetworkId,
}

/// Output of one replication pass for one observer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ReplicationMessages {
    /// Entities to spawn.
    pub spawns: Vec<SpawnEntity>,
    /// Field updates.
    pub updates: Vec<EntityUpdate>,
    /// Entities to remove.
    pub despawns: Vec<DespawnEntity>,
}

impl ReplicationMessages {
    /// Returns `true` if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.updates.is_empty() && self.despawns.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ReplicationServerSystem
// ---------------------------------------------------------------------------

/// Last-synced bytes per entity per field for one observer.
#[derive(Debug, Clone, Default)]
struct ClientShadow {
    entities: HashMap<NetworkId, HashMap<&'static str, Vec<u8>>>,
}

/// Authority-side replication: diffs field values against per-observer
/// shadow state and emits minimal messages.
pub struct ReplicationServerSystem {
    next_network_id: u64,
    shadows: HashMap<ParticipantId, ClientShadow>,
}

impl ReplicationServerSystem {
    /// Creates a system with no observers.
    pub fn new() -> Self {
        Self {
            next_network_id: 1,
            shadows: HashMap::new(),
        }
    }

    /// Allocates the next [`NetworkId`].
    pub fn allocate_network_id(&mut self) -> NetworkId {
        let id = NetworkId(self.next_network_id);
        self.next_network_id += 1;
        id
    }

    /// Starts tracking an observer. Everything currently replicated is
    /// spawned for it on the next pass.
    pub fn add_client(&mut self, client: ParticipantId) {
        self.shadows.entry(client).or_default();
    }

    /// Stops tracking an observer.
    pub fn remove_client(&mut self, client: ParticipantId) {
        self.shadows.remove(&client);
    }

    /// Observers currently tracked.
    pub fn clients(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.shadows.keys().copied()
    }

    /// Runs one replication pass over every entity carrying a [`NetworkId`].
    pub fn replicate(
        &mut self,
        world: &mut World,
        rep_set: &ReplicationSet,
        tick: u64,
    ) -> HashMap<ParticipantId, ReplicationMessages> {
        let mut query = world.query::<(Entity, &NetworkId, Option<&NetOwner>)>();
        let replicated: Vec<(Entity, NetworkId, Option<ParticipantId>)> = query
            .iter(world)
            .map(|(entity, net_id, owner)| (entity, *net_id, owner.map(|o| o.0)))
            .collect();

        // Serialize once; filter per observer below.
        let mut current: HashMap<NetworkId, (Option<ParticipantId>, Vec<(&FieldSpec, Vec<u8>)>)> =
            HashMap::with_capacity(replicated.len());
        for (entity, net_id, owner) in &replicated {
            let fields = rep_set
                .descriptors
                .iter()
                .filter_map(|desc| (desc.serializer)(world, *entity).map(|b| (&desc.spec, b)))
                .collect();
            current.insert(*net_id, (*owner, fields));
        }
        let live: HashSet<NetworkId> = current.keys().copied().collect();

        let mut result = HashMap::with_capacity(self.shadows.len());
        for (client, shadow) in &mut self.shadows {
            let mut msgs = ReplicationMessages::default();

            shadow.entities.retain(|net_id, _| {
                let alive = live.contains(net_id);
                if !alive {
                    msgs.despawns.push(DespawnEntity {
                        network_id: *net_id,
                    });
                }
                alive
            });

            for (net_id, (owner, fields)) in &current {
                let visible = fields.iter().filter(|(spec, _)| {
                    spec.condition == ReplicationCondition::All || *owner != Some(*client)
                });
                match shadow.entities.entry(*net_id) {
                    Entry::Vacant(vacant) => {
                        let snapshot: Vec<(&'static str, Vec<u8>)> =
                            visible.map(|(spec, bytes)| (spec.tag, bytes.clone())).collect();
                        msgs.spawns.push(SpawnEntity {
                            network_id: *net_id,
                            fields: snapshot
                                .iter()
                                .map(|(tag, bytes)| (tag.to_string(), bytes.clone()))
                                .collect(),
                        });
                        vacant.insert(snapshot.into_iter().collect());
                    }
                    Entry::Occupied(mut occupied) => {
                        let synced = occupied.get_mut();
                        let mut changed = Vec::new();
                        for (spec, bytes) in visible {
                            if synced.get(spec.tag) != Some(bytes) {
                                changed.push((spec.tag.to_string(), bytes.clone()));
                                synced.insert(spec.tag, bytes.clone());
                            }
                        }
                        if !changed.is_empty() {
                            msgs.updates.push(EntityUpdate {
                                network_id: *net_id,
                                tick,
                                changed_fields: changed,
                            });
                        }
                    }
                }
            }

            // Deterministic order for the wire.
            msgs.spawns.sort_by_key(|s| s.network_id);
            msgs.updates.sort_by_key(|u| u.network_id);
            msgs.despawns.sort_by_key(|d| d.network_id);
            result.insert(*client, msgs);
        }

        result
    }
}

impl Default for ReplicationServerSystem {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ReplicationClientSystem
// ---------------------------------------------------------------------------

/// Observer-side replication: applies [`ReplicationMessages`] to the local
/// world and runs notify hooks.
pub struct ReplicationClientSystem {
    net_to_local: HashMap<NetworkId, Entity>,
}

impl ReplicationClientSystem {
    /// Creates an empty client system.
    pub fn new() -> Self {
        Self {
            net_to_local: HashMap::new(),
        }
    }

    /// Applies one batch. Hooks run after every field of the batch has been
    /// written, once per changed field, in message order.
    pub fn apply(&mut self, world: &mut World, rep_set: &ReplicationSet, msgs: &ReplicationMessages) {
        let mut notifications: Vec<(Entity, NotifyFn)> = Vec::new();

        for spawn in &msgs.spawns {
            let entity = match self.net_to_local.get(&spawn.network_id) {
                Some(&entity) if world.get_entity(entity).is_ok() => entity,
                _ => {
                    let entity = world.spawn(spawn.network_id).id();
                    self.net_to_local.insert(spawn.network_id, entity);
                    entity
                }
            };
            Self::write_fields(world, rep_set, entity, &spawn.fields, &mut notifications);
        }

        for update in &msgs.updates {
            let Some(&entity) = self.net_to_local.get(&update.network_id) else {
                debug!(network_id = update.network_id.0, "update for unknown entity dropped");
                continue;
            };
            Self::write_fields(world, rep_set, entity, &update.changed_fields, &mut notifications);
        }

        for despawn in &msgs.despawns {
            if let Some(entity) = self.net_to_local.remove(&despawn.network_id)
                && world.get_entity(entity).is_ok()
            {
                world.despawn(entity);
            }
        }

        for (entity, hook) in notifications {
            if world.get_entity(entity).is_ok() {
                hook(world, entity);
            }
        }
    }

    fn write_fields(
        world: &mut World,
        rep_set: &ReplicationSet,
        entity: Entity,
        fields: &[(FieldTag, Vec<u8>)],
        notifications: &mut Vec<(Entity, NotifyFn)>,
    ) {
        for (tag, bytes) in fields {
            let Some(desc) = rep_set.descriptor(tag) else {
                warn!(tag = tag.as_str(), "received unregistered field");
                continue;
            };
            match (desc.deserializer)(world, entity, bytes) {
                FieldWrite::Changed => {
                    if let Some(hook) = desc.spec.notify {
                        notifications.push((entity, hook));
                    }
                }
                FieldWrite::Unchanged => {}
                FieldWrite::Rejected => {
                    warn!(tag = tag.as_str(), "malformed field payload dropped");
                }
            }
        }
    }

    /// Returns the local [`Entity`] for a given [`NetworkId`], if known.
    pub fn local_entity(&self, net_id: NetworkId) -> Option<Entity> {
        self.net_to_local.get(&net_id).copied()
    }

    /// Number of entities currently mirrored.
    pub fn entity_count(&self) -> usize {
        self.net_to_local.len()
    }
}

impl Default for ReplicationClientSystem {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "replication_tests.rs"]
mod tests;
