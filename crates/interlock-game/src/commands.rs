//! Requests participants send to the authority, and what the authority
//! broadcasts back.
//!
//! Every request is validated against authoritative state before it is
//! applied; a rejected request changes nothing and the sender is not told.

use glam::Vec3;
use interlock_net::{HandleError, NetOwner, NetworkId, ParticipantId, RemoteCommand, RequestContext};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::authority::Authority;
use crate::button;
use crate::character::CharacterSettings;
use crate::door;
use crate::movable_crate;
use crate::spatial::{Rotator, Transform, View};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A reliable request to the authority. The sender is implied by the
/// connection it arrived on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Request {
    /// Open a door whose buttons are held by two participants.
    RequestOpen {
        /// Target door.
        door: NetworkId,
    },
    /// Close an open door.
    RequestClose {
        /// Target door.
        door: NetworkId,
    },
    /// Press or release a button through the sender's character. Makes the
    /// sender the button's owner.
    PressButton {
        /// Target button.
        button: NetworkId,
        /// Desired state.
        pressed: bool,
    },
    /// Press or release a button the sender already owns.
    SetPressed {
        /// Target button.
        button: NetworkId,
        /// Desired state.
        pressed: bool,
    },
    /// Resize the sender's character.
    ChangeSize {
        /// New uniform scale.
        scale: f32,
    },
    /// Reload the current map after a short delay.
    RequestLevelRestart,
    /// Start dragging a crate.
    BeginDrag {
        /// Target crate.
        target: NetworkId,
        /// Who is to hold it; must be the sender.
        requester: ParticipantId,
    },
    /// Pull the dragged crate toward `location`.
    UpdateDrag {
        /// Target crate.
        target: NetworkId,
        /// Desired position; the height is ignored.
        location: Vec3,
    },
    /// Let go of a crate.
    EndDrag {
        /// Target crate.
        target: NetworkId,
    },
}

/// An unreliable, latest-wins notification from the authority.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Broadcast {
    /// A character's head rotation changed.
    UpdateHeadLookAngle {
        /// The character.
        character: NetworkId,
        /// New head rotation.
        rotation: Rotator,
    },
}

impl Broadcast {
    /// Entity the broadcast is about; latest-wins ordering is per subject.
    pub fn subject(&self) -> NetworkId {
        match self {
            Broadcast::UpdateHeadLookAngle { character, .. } => *character,
        }
    }
}

// ---------------------------------------------------------------------------
// Rejection
// ---------------------------------------------------------------------------

/// Why the authority refused a request.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Rejection {
    /// The target could not be resolved.
    #[error(transparent)]
    Target(#[from] HandleError),

    /// The sender has no live character.
    #[error("{0} has no character")]
    NoPawn(ParticipantId),

    /// The door is missing a button and ignores requests.
    #[error("door is disabled")]
    DoorDisabled,

    /// The door is already open.
    #[error("door is already open")]
    AlreadyOpen,

    /// The door is already closed.
    #[error("door is already closed")]
    AlreadyClosed,

    /// The two-button condition does not hold.
    #[error("both buttons must be held by different participants")]
    ConditionNotMet,

    /// Too far from the target.
    #[error("target is {distance:.1} away, max {max:.1}")]
    OutOfRange {
        /// Measured distance.
        distance: f32,
        /// Allowed distance.
        max: f32,
    },

    /// Not looking at the target.
    #[error("target is {angle:.2} degrees off view, max {max:.2}")]
    OutsideViewCone {
        /// Measured angle in degrees.
        angle: f32,
        /// Allowed angle in degrees.
        max: f32,
    },

    /// The sender does not own the target.
    #[error("{0} does not own the target")]
    NotOwner(ParticipantId),

    /// The crate is held by someone.
    #[error("crate is already dragged by {0}")]
    AlreadyDragged(ParticipantId),

    /// The crate is not being dragged.
    #[error("crate is not being dragged")]
    NotDragged,

    /// Scale outside the character bounds.
    #[error("scale {scale} outside [{min}, {max}]")]
    ScaleOutOfBounds {
        /// Requested scale.
        scale: f32,
        /// Lower bound.
        min: f32,
        /// Upper bound.
        max: f32,
    },

    /// A drag was requested on behalf of someone else.
    #[error("requester {claimed} is not the sender {sender}")]
    RequesterMismatch {
        /// Identity in the request.
        claimed: ParticipantId,
        /// Connection the request arrived on.
        sender: ParticipantId,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn sender_view(authority: &Authority, sender: ParticipantId) -> Result<View, Rejection> {
    let character = authority.require_character(sender)?;
    authority
        .world()
        .get::<View>(character)
        .copied()
        .ok_or(Rejection::NoPawn(sender))
}

impl RemoteCommand for Request {
    type State = Authority;
    type Rejection = Rejection;

    fn validate(&self, authority: &Authority, ctx: &RequestContext) -> Result<(), Rejection> {
        let world = authority.world();
        match *self {
            Request::RequestOpen { door } => door::validate_open(world, authority.resolve(door)?),
            Request::RequestClose { door } => door::validate_close(world, authority.resolve(door)?),
            Request::PressButton { button, pressed } => {
                let button = authority.resolve(button)?;
                let view = sender_view(authority, ctx.sender)?;
                if pressed {
                    button::validate_interaction(world, button, &view)?;
                }
                Ok(())
            }
            Request::SetPressed { button, pressed } => {
                let button = authority.resolve(button)?;
                if world.get::<NetOwner>(button) != Some(&NetOwner(ctx.sender)) {
                    return Err(Rejection::NotOwner(ctx.sender));
                }
                if pressed {
                    let view = sender_view(authority, ctx.sender)?;
                    button::validate_interaction(world, button, &view)?;
                }
                Ok(())
            }
            Request::ChangeSize { scale } => {
                let character = authority.require_character(ctx.sender)?;
                world
                    .get::<CharacterSettings>(character)
                    .ok_or(Rejection::NoPawn(ctx.sender))?
                    .validate_scale(scale)
            }
            Request::RequestLevelRestart => Ok(()),
            Request::BeginDrag { target, requester } => {
                if requester != ctx.sender {
                    return Err(Rejection::RequesterMismatch {
                        claimed: requester,
                        sender: ctx.sender,
                    });
                }
                let crate_entity = authority.resolve(target)?;
                let character = authority.require_character(ctx.sender)?;
                let location = world
                    .get::<Transform>(character)
                    .map(|t| t.location)
                    .ok_or(Rejection::NoPawn(ctx.sender))?;
                movable_crate::validate_begin(world, crate_entity, location)
            }
            Request::UpdateDrag { target, .. } | Request::EndDrag { target } => {
                movable_crate::validate_dragged(world, authority.resolve(target)?)
            }
        }
    }

    fn apply(&self, authority: &mut Authority, ctx: &RequestContext) {
        let target = match *self {
            Request::RequestOpen { door } | Request::RequestClose { door } => Some(door),
            Request::PressButton { button, .. } | Request::SetPressed { button, .. } => Some(button),
            Request::BeginDrag { target, .. }
            | Request::UpdateDrag { target, .. }
            | Request::EndDrag { target } => Some(target),
            Request::ChangeSize { .. } | Request::RequestLevelRestart => None,
        };
        let entity = match target.map(|id| authority.resolve(id)).transpose() {
            Ok(entity) => entity,
            Err(err) => {
                warn!(%err, request = ?self, "target vanished between validate and apply");
                return;
            }
        };

        match (*self, entity) {
            (Request::RequestOpen { .. }, Some(door)) => authority.open_door(door),
            (Request::RequestClose { .. }, Some(door)) => authority.close_door(door),
            (Request::PressButton { pressed, .. }, Some(button)) => {
                if let Ok(mut entity) = authority.world_mut().get_entity_mut(button) {
                    entity.insert(NetOwner(ctx.sender));
                }
                authority.set_button_pressed(button, pressed, ctx.sender);
            }
            (Request::SetPressed { pressed, .. }, Some(button)) => {
                authority.set_button_pressed(button, pressed, ctx.sender);
            }
            (Request::ChangeSize { scale }, _) => authority.change_size(ctx.sender, scale),
            (Request::RequestLevelRestart, _) => authority.request_level_restart(ctx.sender),
            (Request::BeginDrag { requester, .. }, Some(crate_entity)) => {
                authority.begin_drag(crate_entity, requester);
            }
            (Request::UpdateDrag { location, .. }, Some(crate_entity)) => {
                authority.update_drag(crate_entity, location, ctx.dt);
            }
            (Request::EndDrag { .. }, Some(crate_entity)) => authority.end_drag(crate_entity),
            (request, None) => warn!(?request, "request without target"),
        }
    }
}
