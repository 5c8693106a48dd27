//! An observing participant.
//!
//! The client mirrors the authority's world through replication, presents
//! state changes locally, and turns player intent into requests. It never
//! writes replicated fields itself except where it is the subject of a
//! skip-owner field (its own head look) or predicts its own scale.

use bevy_ecs::prelude::*;
use glam::Vec3;
use interlock_config::Config;
use interlock_net::channel::SequenceNumber;
use interlock_net::{
    CodecError, LatestWinsReceiver, NetworkId, ParticipantId, ReliableReceiver, ReliableSender,
    ReplicationClientSystem, ReplicationMessages, ReplicationSet, UnreliableSender, decode,
    encode,
};
use tracing::{debug, warn};

use crate::button::{self, ButtonPressed, PressedBy};
use crate::character::{self, CharacterScale, CharacterSettings, HeadLook, Pawn};
use crate::commands::{Broadcast, Request};
use crate::door::{self, DoorOpen};
use crate::movable_crate::DragHolder;
use crate::presentation::{LocationGlide, PresentedScale, step_presentation};
use crate::protocol::{ClientPacket, ServerPacket};
use crate::schema::replication_set;
use crate::spatial::{Rotator, Transform};

/// A press this client asked for. Confirmed once the replicated presser is
/// this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingPress {
    button: NetworkId,
    confirmed: bool,
}

/// Client side of one connection.
pub struct Client {
    id: ParticipantId,
    world: World,
    rep_set: ReplicationSet,
    replication: ReplicationClientSystem,
    requests: ReliableSender<Request>,
    updates: ReliableReceiver<ReplicationMessages>,
    head_look_tx: UnreliableSender,
    broadcasts: LatestWinsReceiver<NetworkId>,
    acks: Vec<SequenceNumber>,
    outgoing_head_look: Option<Rotator>,
    clock: f64,
    settings: CharacterSettings,
    hold_distance: f32,
    glide_speed: f32,
    control: Rotator,
    pressed_button: Option<PendingPress>,
    held_crate: Option<NetworkId>,
    last_head_look: Option<Rotator>,
}

impl Client {
    /// A client for `id` with no mirrored state yet.
    pub fn new(id: ParticipantId, config: &Config) -> Self {
        Self {
            id,
            world: World::new(),
            rep_set: replication_set(),
            replication: ReplicationClientSystem::new(),
            requests: ReliableSender::new(config.network.resend_interval_secs),
            updates: ReliableReceiver::new(),
            head_look_tx: UnreliableSender::new(),
            broadcasts: LatestWinsReceiver::new(),
            acks: Vec::new(),
            outgoing_head_look: None,
            clock: 0.0,
            settings: CharacterSettings::from(&config.character),
            hold_distance: config.crate_drag.hold_distance,
            glide_speed: config.crate_drag.drag_interp_speed,
            control: Rotator::ZERO,
            pressed_button: None,
            held_crate: None,
            last_head_look: None,
        }
    }

    /// This client's participant id.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// The mirrored world.
    pub fn world(&self) -> &World {
        &self.world
    }

    // -- Network ------------------------------------------------------------

    /// Handles one datagram from the server.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        match decode::<ServerPacket>(bytes)? {
            ServerPacket::Replication(sequenced) => {
                self.acks.push(sequenced.seq);
                for batch in self.updates.receive(sequenced) {
                    self.replication
                        .apply(&mut self.world, &self.rep_set, &batch);
                }
            }
            ServerPacket::Broadcast(sequenced) => {
                let subject = sequenced.payload.subject();
                if let Some(broadcast) = self.broadcasts.accept(subject, sequenced) {
                    self.apply_broadcast(broadcast);
                }
            }
            ServerPacket::Ack(seq) => self.requests.acknowledge(seq),
        }
        Ok(())
    }

    fn apply_broadcast(&mut self, broadcast: Broadcast) {
        match broadcast {
            Broadcast::UpdateHeadLookAngle {
                character,
                rotation,
            } => {
                let Some(entity) = self.local_entity(character) else {
                    debug!(?character, "head look for unknown character dropped");
                    return;
                };
                if self.world.get::<Pawn>(entity).map(|p| p.0) == Some(self.id) {
                    return;
                }
                if let Ok(mut entity) = self.world.get_entity_mut(entity) {
                    entity.insert(HeadLook(rotation));
                }
            }
        }
    }

    /// Serialized packets due now.
    pub fn collect_outgoing(&mut self) -> Vec<Vec<u8>> {
        let mut packets: Vec<ClientPacket> =
            self.acks.drain(..).map(ClientPacket::Ack).collect();
        packets.extend(
            self.requests
                .collect_outgoing(self.clock)
                .into_iter()
                .map(ClientPacket::Request),
        );
        if let Some(rotation) = self.outgoing_head_look.take() {
            packets.push(ClientPacket::HeadLook(self.head_look_tx.stamp(rotation)));
        }
        packets
            .iter()
            .filter_map(|packet| match encode(packet) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(%err, "failed to encode client packet");
                    None
                }
            })
            .collect()
    }

    /// Requests not yet acknowledged by the server.
    pub fn unacknowledged(&self) -> usize {
        self.requests.in_flight()
    }

    // -- Frame --------------------------------------------------------------

    /// Advances local presentation and per-frame intent by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.clock += f64::from(dt);
        self.attach_crate_glides();
        step_presentation(&mut self.world, dt);
        self.update_pressed_button();
        self.update_held_crate();
        self.update_head_look();
    }

    fn attach_crate_glides(&mut self) {
        let mut query = self
            .world
            .query_filtered::<(Entity, &Transform), (With<DragHolder>, Without<LocationGlide>)>();
        let fresh: Vec<(Entity, Vec3)> = query
            .iter(&self.world)
            .map(|(entity, transform)| (entity, transform.location))
            .collect();
        for (entity, location) in fresh {
            if let Ok(mut entity) = self.world.get_entity_mut(entity) {
                entity.insert(LocationGlide::at(location, self.glide_speed));
            }
        }
    }

    fn update_pressed_button(&mut self) {
        let Some(mut press) = self.pressed_button else {
            return;
        };
        if self.local_entity(press.button).is_none() {
            debug!(button = ?press.button, "pressed button expired; forgetting it");
            self.pressed_button = None;
            return;
        }
        if self.presser(press.button) == Some(self.id) {
            press.confirmed = true;
            self.pressed_button = Some(press);
        } else if press.confirmed {
            debug!(button = ?press.button, "button released by the authority");
            self.pressed_button = None;
        }
    }

    fn update_held_crate(&mut self) {
        let Some(crate_id) = self.held_crate else {
            return;
        };
        if self.local_entity(crate_id).is_none() {
            debug!(?crate_id, "held crate expired; treating as released");
            self.held_crate = None;
            return;
        }
        if self.drag_holder(crate_id) != Some(self.id) {
            return;
        }
        let Some(me) = self.my_character() else {
            return;
        };
        let Some(location) = self.world.get::<Transform>(me).map(|t| t.location) else {
            return;
        };
        let target = location + self.control.forward() * self.hold_distance;
        self.request(Request::UpdateDrag {
            target: crate_id,
            location: target,
        });
    }

    fn update_head_look(&mut self) {
        let Some(me) = self.my_character() else {
            return;
        };
        let Some(body) = self.world.get::<Transform>(me).map(|t| t.rotation) else {
            return;
        };
        let look = character::head_look_from(self.control, body, self.settings.head_look_limit_deg);
        if self.last_head_look == Some(look) {
            return;
        }
        self.last_head_look = Some(look);
        if let Ok(mut entity) = self.world.get_entity_mut(me) {
            entity.insert(HeadLook(look));
        }
        self.outgoing_head_look = Some(look);
    }

    // -- Intent -------------------------------------------------------------

    /// Queues a request on the reliable channel.
    pub fn request(&mut self, request: Request) {
        self.requests.send(request);
    }

    /// Sets where the player is looking.
    pub fn set_control_rotation(&mut self, rotation: Rotator) {
        self.control = rotation;
    }

    /// Where the player is looking.
    pub fn control_rotation(&self) -> Rotator {
        self.control
    }

    /// Starts pressing `button`.
    pub fn press_button(&mut self, button: NetworkId) {
        self.pressed_button = Some(PendingPress {
            button,
            confirmed: false,
        });
        self.request(Request::PressButton {
            button,
            pressed: true,
        });
    }

    /// Releases the button pressed last, if any. Nothing is sent once the
    /// button is held by someone else.
    pub fn release_button(&mut self) {
        let Some(PendingPress { button, .. }) = self.pressed_button.take() else {
            return;
        };
        if let Some(holder) = self.presser(button)
            && holder != self.id
        {
            debug!(?button, %holder, "button now held by someone else; not releasing");
            return;
        }
        self.request(Request::PressButton {
            button,
            pressed: false,
        });
    }

    /// Button this client believes it is pressing.
    pub fn pressed_button(&self) -> Option<NetworkId> {
        self.pressed_button.map(|p| p.button)
    }

    /// Starts dragging `crate_id`.
    pub fn grab(&mut self, crate_id: NetworkId) {
        self.held_crate = Some(crate_id);
        self.request(Request::BeginDrag {
            target: crate_id,
            requester: self.id,
        });
    }

    /// Lets go of the held crate. Nothing is sent if it no longer exists.
    pub fn release_grab(&mut self) {
        let Some(crate_id) = self.held_crate.take() else {
            return;
        };
        if self.local_entity(crate_id).is_some() {
            self.request(Request::EndDrag { target: crate_id });
        }
    }

    /// Resizes the own character: clamped and presented at once, then
    /// confirmed or corrected by replication. Non-finite scales are ignored.
    pub fn change_size(&mut self, scale: f32) {
        if !scale.is_finite() {
            debug!(scale, "ignoring non-finite scale");
            return;
        }
        let scale = self.settings.clamp_scale(scale);
        if let Some(me) = self.my_character()
            && let Ok(mut entity) = self.world.get_entity_mut(me)
        {
            entity.insert(PresentedScale(scale));
        }
        self.request(Request::ChangeSize { scale });
    }

    // -- Queries ------------------------------------------------------------

    /// Local entity mirroring `id`, if it is still alive.
    pub fn local_entity(&self, id: NetworkId) -> Option<Entity> {
        let entity = self.replication.local_entity(id)?;
        self.world.get_entity(entity).ok().map(|_| entity)
    }

    fn ids_with<C: Component>(&mut self) -> Vec<NetworkId> {
        let mut query = self.world.query_filtered::<&NetworkId, With<C>>();
        let mut ids: Vec<NetworkId> = query.iter(&self.world).copied().collect();
        ids.sort();
        ids
    }

    /// Mirrored doors.
    pub fn doors(&mut self) -> Vec<NetworkId> {
        self.ids_with::<DoorOpen>()
    }

    /// Mirrored buttons.
    pub fn buttons(&mut self) -> Vec<NetworkId> {
        self.ids_with::<ButtonPressed>()
    }

    /// Mirrored crates.
    pub fn crates(&mut self) -> Vec<NetworkId> {
        self.ids_with::<DragHolder>()
    }

    /// Local character of `participant`.
    pub fn character_of(&self, participant: ParticipantId) -> Option<Entity> {
        self.world
            .iter_entities()
            .find(|entity| entity.get::<Pawn>().is_some_and(|pawn| pawn.0 == participant))
            .map(|entity| entity.id())
    }

    /// This client's own character.
    pub fn my_character(&self) -> Option<Entity> {
        self.character_of(self.id)
    }

    fn field<C: Component + Copy>(&self, id: NetworkId) -> Option<C> {
        self.world.get::<C>(self.local_entity(id)?).copied()
    }

    /// Replicated door flag.
    pub fn door_open(&self, door: NetworkId) -> Option<bool> {
        self.field::<DoorOpen>(door).map(|o| o.0)
    }

    /// Presented door hinge yaw.
    pub fn door_yaw(&self, door: NetworkId) -> Option<f32> {
        door::presented_yaw(&self.world, self.local_entity(door)?)
    }

    /// Replicated button flag.
    pub fn button_pressed(&self, button: NetworkId) -> Option<bool> {
        self.field::<ButtonPressed>(button).map(|p| p.0)
    }

    /// Replicated presser.
    pub fn presser(&self, button: NetworkId) -> Option<ParticipantId> {
        self.field::<PressedBy>(button).and_then(|p| p.0)
    }

    /// Presented cap location.
    pub fn button_location(&self, button: NetworkId) -> Option<Vec3> {
        button::presented_location(&self.world, self.local_entity(button)?)
    }

    /// Replicated drag holder.
    pub fn drag_holder(&self, crate_id: NetworkId) -> Option<ParticipantId> {
        self.field::<DragHolder>(crate_id).and_then(|h| h.0)
    }

    /// Location a crate is drawn at.
    pub fn presented_location(&self, crate_id: NetworkId) -> Option<Vec3> {
        self.field::<LocationGlide>(crate_id).map(|g| g.presented)
    }

    /// Replicated location of any entity.
    pub fn location(&self, id: NetworkId) -> Option<Vec3> {
        self.field::<Transform>(id).map(|t| t.location)
    }

    /// Replicated scale of `participant`'s character.
    pub fn character_scale(&self, participant: ParticipantId) -> Option<f32> {
        let entity = self.character_of(participant)?;
        self.world.get::<CharacterScale>(entity).map(|s| s.0)
    }

    /// Scale `participant`'s character is drawn at.
    pub fn presented_scale(&self, participant: ParticipantId) -> Option<f32> {
        character::presented_scale(&self.world, self.character_of(participant)?)
    }

    /// Head look of `participant`'s character as known here.
    pub fn head_look(&self, participant: ParticipantId) -> Option<Rotator> {
        let entity = self.character_of(participant)?;
        self.world.get::<HeadLook>(entity).map(|h| h.0)
    }

    /// Crate this client believes it holds.
    pub fn held_crate(&self) -> Option<NetworkId> {
        self.held_crate
    }
}
