//! Server-authoritative level state.
//!
//! [`Authority`] owns the canonical [`World`]. Participants change it only
//! through [`Request`]s, which are validated and applied one at a time via
//! [`dispatch`]. Each tick the authority re-checks every outstanding grant
//! (pressed buttons, dragged crates), fires due timers and advances its own
//! presentation, then replication diffs the world out to every observer.

use std::collections::{BTreeSet, HashMap};

use bevy_ecs::prelude::*;
use glam::Vec3;
use interlock_config::Config;
use interlock_net::{
    Dispatch, HandleError, NetworkId, NetworkRegistry, NetOwner, ParticipantId,
    ReplicationMessages, ReplicationServerSystem, ReplicationSet, RequestContext, TimerQueue,
    WeakEntity, dispatch,
};
use tracing::{error, info, warn};

use crate::button::{self, ButtonListeners, ButtonPressed, ButtonSettings, PressedBy};
use crate::character::{self, CharacterScale, CharacterSettings, HeadLook, Pawn};
use crate::commands::{Broadcast, Rejection, Request};
use crate::door::{self, DoorAuthority, DoorOpen, DoorSettings, DoorTransition};
use crate::level::LevelLayout;
use crate::movable_crate::{self, CrateSettings, DragHolder, DragState, RigidBody};
use crate::presentation::{PresentedScale, step_presentation};
use crate::schema::replication_set;
use crate::spatial::{Rotator, Transform, View};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthorityTimer {
    CrateSettle(Entity),
    LevelRestart,
}

/// Something observable the authority did on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityEvent {
    /// A door changed state.
    Door {
        /// The door.
        door: NetworkId,
        /// What happened.
        transition: DoorTransition,
    },
    /// The map was reloaded or replaced; every previous entity is gone.
    Travelled {
        /// Map now loaded.
        map: String,
    },
}

/// Network ids of the level entities spawned from the current layout, in
/// layout order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelEntities {
    /// Door ids.
    pub doors: Vec<NetworkId>,
    /// Button ids.
    pub buttons: Vec<NetworkId>,
    /// Crate ids.
    pub crates: Vec<NetworkId>,
}

/// The authoritative simulation of one map.
pub struct Authority {
    world: World,
    registry: NetworkRegistry,
    replication: ReplicationServerSystem,
    rep_set: ReplicationSet,
    timers: TimerQueue<AuthorityTimer>,
    config: Config,
    layout: LevelLayout,
    level: LevelEntities,
    characters: HashMap<ParticipantId, Entity>,
    connected: BTreeSet<ParticipantId>,
    tick: u64,
    tick_dt: f32,
    broadcasts: Vec<(ParticipantId, Broadcast)>,
    events: Vec<AuthorityEvent>,
}

impl Authority {
    /// Loads `layout` with no participants.
    pub fn new(config: Config, layout: LevelLayout) -> Self {
        let tick_dt = 1.0 / config.session.tick_rate.max(1) as f32;
        let mut authority = Self {
            world: World::new(),
            registry: NetworkRegistry::new(),
            replication: ReplicationServerSystem::new(),
            rep_set: replication_set(),
            timers: TimerQueue::new(),
            config,
            layout,
            level: LevelEntities::default(),
            characters: HashMap::new(),
            connected: BTreeSet::new(),
            tick: 0,
            tick_dt,
            broadcasts: Vec::new(),
            events: Vec::new(),
        };
        authority.spawn_layout();
        info!(map = %authority.layout.name, "level loaded");
        authority
    }

    // -- Accessors ----------------------------------------------------------

    /// The canonical world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access for collaborators outside the request path (movement).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Authority ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Settings the level was spawned with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Name of the loaded map.
    pub fn map(&self) -> &str {
        &self.layout.name
    }

    /// Entities spawned from the layout.
    pub fn level(&self) -> &LevelEntities {
        &self.level
    }

    /// Participants with a character in this level.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.connected.iter().copied()
    }

    /// Resolves a network id to a live entity.
    pub fn resolve(&self, id: NetworkId) -> Result<Entity, HandleError> {
        self.registry.resolve(&self.world, id)
    }

    /// Network id of a replicated entity.
    pub fn network_id(&self, entity: Entity) -> Option<NetworkId> {
        self.registry.network_id(entity)
    }

    /// The participant's live character.
    pub fn character(&self, participant: ParticipantId) -> Option<Entity> {
        let entity = *self.characters.get(&participant)?;
        WeakEntity::new(entity).upgrade(&self.world).ok()
    }

    /// Like [`character`](Self::character) but as a request rejection.
    pub fn require_character(&self, participant: ParticipantId) -> Result<Entity, Rejection> {
        self.character(participant)
            .ok_or(Rejection::NoPawn(participant))
    }

    /// Returns `true` while the restart timer is armed.
    pub fn is_restart_pending(&self) -> bool {
        self.timers.is_pending(&AuthorityTimer::LevelRestart)
    }

    // -- Participants -------------------------------------------------------

    /// Adds a participant: it starts observing and gets a character.
    pub fn join(&mut self, participant: ParticipantId) {
        if !self.connected.insert(participant) {
            warn!(%participant, "participant joined twice");
            return;
        }
        self.replication.add_client(participant);
        self.spawn_character(participant);
    }

    /// Removes a participant and its character. Grants it held are released
    /// by the next revalidation.
    pub fn leave(&mut self, participant: ParticipantId) {
        if !self.connected.remove(&participant) {
            return;
        }
        self.replication.remove_client(participant);
        if let Some(character) = self.characters.remove(&participant) {
            if let Some(id) = self.registry.network_id(character) {
                self.registry.remove(id);
            }
            if self.world.get_entity(character).is_ok() {
                self.world.despawn(character);
            }
        }
        info!(%participant, "participant left");
    }

    /// Places a participant's character, as reported by movement.
    pub fn set_character_pose(
        &mut self,
        participant: ParticipantId,
        transform: Transform,
        control: Rotator,
    ) {
        let Some(character) = self.character(participant) else {
            return;
        };
        if let Ok(mut entity) = self.world.get_entity_mut(character) {
            entity.insert((transform, character::eye_view(&transform, control)));
        }
    }

    // -- Requests -----------------------------------------------------------

    /// Validates and applies one request from `sender`.
    pub fn handle_request(
        &mut self,
        sender: ParticipantId,
        request: &Request,
    ) -> Dispatch<Rejection> {
        let ctx = RequestContext {
            sender,
            tick: self.tick,
            dt: self.tick_dt,
        };
        dispatch(request, self, &ctx)
    }

    /// Stores a head rotation reported by `sender`'s client and queues the
    /// broadcast to everyone else.
    pub fn receive_head_look(&mut self, sender: ParticipantId, rotation: Rotator) {
        let Some(character) = self.character(sender) else {
            return;
        };
        let limit = self
            .world
            .get::<CharacterSettings>(character)
            .map_or(self.config.character.head_look_limit_deg, |s| s.head_look_limit_deg);
        let sanitized = Rotator::from_yaw(rotation.yaw.clamp(-limit, limit));
        if let Some(mut head) = self.world.get_mut::<HeadLook>(character) {
            head.0 = sanitized;
        }
        if let Some(id) = self.registry.network_id(character) {
            self.broadcasts.push((sender, Broadcast::UpdateHeadLookAngle {
                character: id,
                rotation: sanitized,
            }));
        }
    }

    pub(crate) fn open_door(&mut self, door: Entity) {
        if door::open_door(&mut self.world, door) {
            self.door_event(door, DoorTransition::Opened);
        }
    }

    pub(crate) fn close_door(&mut self, door: Entity) {
        if door::close_door(&mut self.world, door) {
            self.door_event(door, DoorTransition::Closed);
        }
    }

    fn door_event(&mut self, door: Entity, transition: DoorTransition) {
        if let Some(id) = self.registry.network_id(door) {
            self.events.push(AuthorityEvent::Door {
                door: id,
                transition,
            });
        }
    }

    /// Writes a button and forwards the change to its doors.
    pub(crate) fn set_button_pressed(
        &mut self,
        button: Entity,
        pressed: bool,
        requester: ParticipantId,
    ) {
        let Some(change) = button::set_pressed(&mut self.world, button, pressed, requester) else {
            return;
        };
        for door in button::listeners(&self.world, button) {
            if let Some(transition) =
                door::on_button_state_changed(&mut self.world, door, button, change.contribution())
            {
                self.door_event(door, transition);
            }
        }
    }

    pub(crate) fn change_size(&mut self, participant: ParticipantId, scale: f32) {
        if let Some(character) = self.character(participant) {
            character::set_scale(&mut self.world, character, scale);
        }
    }

    pub(crate) fn request_level_restart(&mut self, requester: ParticipantId) {
        let delay = self.config.session.restart_delay_secs;
        if self.timers.arm(AuthorityTimer::LevelRestart, delay) {
            info!(%requester, delay_secs = delay, "level restart scheduled");
        } else {
            warn!(%requester, "level restart already pending");
        }
    }

    pub(crate) fn begin_drag(&mut self, crate_entity: Entity, requester: ParticipantId) {
        movable_crate::begin_drag(&mut self.world, crate_entity, requester);
    }

    pub(crate) fn update_drag(&mut self, crate_entity: Entity, target: Vec3, dt: f32) {
        movable_crate::update_drag(&mut self.world, crate_entity, target, dt);
    }

    pub(crate) fn end_drag(&mut self, crate_entity: Entity) {
        if let Some(delay) = movable_crate::end_drag(&mut self.world, crate_entity) {
            self.timers.arm(AuthorityTimer::CrateSettle(crate_entity), delay);
        }
    }

    // -- Tick ---------------------------------------------------------------

    /// Runs one authority tick of `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        self.tick += 1;
        self.tick_dt = dt;
        self.revalidate_grants();

        for timer in self.timers.advance(f64::from(dt)) {
            match timer {
                AuthorityTimer::CrateSettle(crate_entity) => {
                    movable_crate::settle(&mut self.world, crate_entity);
                }
                AuthorityTimer::LevelRestart => {
                    let map = self.layout.name.clone();
                    self.travel(map);
                }
            }
        }

        step_presentation(&mut self.world, dt);
    }

    /// Releases grants whose holder is gone or out of reach.
    fn revalidate_grants(&mut self) {
        let mut buttons = self.world.query::<(Entity, &ButtonPressed, &PressedBy)>();
        let held: Vec<(Entity, ParticipantId)> = buttons
            .iter(&self.world)
            .filter(|(_, pressed, _)| pressed.0)
            .filter_map(|(entity, _, by)| by.0.map(|who| (entity, who)))
            .collect();
        for (button, presser) in held {
            let verdict = self.require_character(presser).and_then(|character| {
                let view = self
                    .world
                    .get::<View>(character)
                    .ok_or(Rejection::NoPawn(presser))?;
                button::validate_interaction(&self.world, button, view)
            });
            if let Err(reason) = verdict {
                info!(?button, %presser, %reason, "auto-releasing button");
                self.set_button_pressed(button, false, presser);
            }
        }

        let mut crates = self.world.query::<(Entity, &DragHolder)>();
        let orphaned: Vec<(Entity, ParticipantId)> = crates
            .iter(&self.world)
            .filter_map(|(entity, holder)| holder.0.map(|who| (entity, who)))
            .filter(|(_, who)| self.character(*who).is_none())
            .collect();
        for (crate_entity, holder) in orphaned {
            info!(?crate_entity, %holder, "releasing crate held by a missing character");
            self.end_drag(crate_entity);
        }
    }

    /// Replication output for every observer.
    pub fn replicate(&mut self) -> HashMap<ParticipantId, ReplicationMessages> {
        self.replication
            .replicate(&mut self.world, &self.rep_set, self.tick)
    }

    /// Broadcasts queued since the last call, each with the participant it
    /// must not be sent to.
    pub fn drain_broadcasts(&mut self) -> Vec<(ParticipantId, Broadcast)> {
        std::mem::take(&mut self.broadcasts)
    }

    /// Events since the last call.
    pub fn drain_events(&mut self) -> Vec<AuthorityEvent> {
        std::mem::take(&mut self.events)
    }

    // -- Level lifecycle ----------------------------------------------------

    /// Replaces the level: every entity is destroyed, pending timers are
    /// dropped, the layout is respawned under `map` and every connected
    /// participant gets a fresh character.
    pub fn travel(&mut self, map: String) {
        info!(from = %self.layout.name, to = %map, "travelling");
        // Per-entity despawn keeps generations increasing, so every handle
        // taken before travel stays expired.
        let entities: Vec<Entity> = self.world.iter_entities().map(|e| e.id()).collect();
        for entity in entities {
            self.world.despawn(entity);
        }
        self.registry.clear();
        self.timers.clear();
        self.characters.clear();
        self.layout.name = map.clone();
        self.spawn_layout();
        let participants: Vec<ParticipantId> = self.connected.iter().copied().collect();
        for participant in participants {
            self.spawn_character(participant);
        }
        self.events.push(AuthorityEvent::Travelled { map });
    }

    /// Loads a different layout, keeping connected participants.
    pub fn load_layout(&mut self, layout: LevelLayout) {
        let map = layout.name.clone();
        self.layout = layout;
        self.travel(map);
    }

    fn spawn_replicated(&mut self, bundle: impl Bundle) -> (Entity, NetworkId) {
        let id = self.replication.allocate_network_id();
        let entity = self.world.spawn((id, bundle)).id();
        self.registry.insert(id, entity);
        (entity, id)
    }

    fn spawn_layout(&mut self) {
        self.level = LevelEntities::default();
        let layout = self.layout.clone();

        let mut buttons = Vec::with_capacity(layout.buttons.len());
        for transform in &layout.buttons {
            let (entity, id) = self.spawn_replicated((
                *transform,
                ButtonPressed(false),
                PressedBy(None),
                ButtonSettings::from(&self.config.button),
                ButtonListeners::default(),
            ));
            button::play_button(&mut self.world, entity);
            buttons.push(entity);
            self.level.buttons.push(id);
        }

        for (index, placement) in layout.doors.iter().enumerate() {
            let [a, b] = placement
                .buttons
                .map(|slot| slot.and_then(|i| buttons.get(i)).map(|&e| WeakEntity::new(e)));
            if a.is_none() || b.is_none() {
                error!(door = index, "door is missing a button; its authority logic is disabled");
            }
            let (entity, id) = self.spawn_replicated((
                placement.transform,
                DoorOpen(false),
                DoorSettings::from_config(&self.config.door, placement.open_backward),
                DoorAuthority::new(a, b, self.config.door.close_policy),
            ));
            for weak in [a, b].into_iter().flatten() {
                if let Some(mut listeners) = self.world.get_mut::<ButtonListeners>(weak.entity()) {
                    listeners.0.push(WeakEntity::new(entity));
                }
            }
            door::play_door(&mut self.world, entity);
            self.level.doors.push(id);
        }

        for location in &layout.crates {
            let (_, id) = self.spawn_replicated((
                Transform::from_location(*location),
                DragHolder(None),
                CrateSettings::from(&self.config.crate_drag),
                RigidBody::simulated(),
                DragState::default(),
            ));
            self.level.crates.push(id);
        }
    }

    fn spawn_character(&mut self, participant: ParticipantId) {
        let index = self
            .connected
            .iter()
            .position(|p| *p == participant)
            .unwrap_or(0);
        let transform = self.layout.spawn_point(index);
        let (entity, id) = self.spawn_replicated((
            transform,
            character::eye_view(&transform, transform.rotation),
            Pawn(participant),
            NetOwner(participant),
            CharacterScale::default(),
            PresentedScale(1.0),
            HeadLook::default(),
            CharacterSettings::from(&self.config.character),
        ));
        self.characters.insert(participant, entity);
        info!(%participant, network_id = id.0, "character spawned");
    }
}

#[cfg(test)]
#[path = "authority_tests.rs"]
mod tests;
