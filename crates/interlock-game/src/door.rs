//! Interlock door.
//!
//! The door listens to two pressure buttons. It opens on the authority at the
//! moment both buttons are held by two different participants; holding both
//! yourself never counts. Once open it stays open until an explicit close
//! request, unless the door was configured with
//! [`ClosePolicy::OnConditionLost`].
//!
//! An explicit open request is also held to the two-button condition, not
//! only to the door being closed.

use bevy_ecs::prelude::*;
use interlock_config::{ClosePolicy, DoorConfig};
use interlock_net::{HandleError, ParticipantId, WeakEntity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commands::Rejection;
use crate::presentation::{Direction, DoorSwing, Interpolator};
use crate::spatial::Transform;

// ---------------------------------------------------------------------------
// Replicated fields
// ---------------------------------------------------------------------------

/// Replicated open flag.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoorOpen(pub bool);

/// Static per-door swing settings, replicated once at spawn.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DoorSettings {
    /// Seconds for a full swing.
    pub open_duration: f32,
    /// Hinge yaw added to the closed rotation when open.
    pub open_offset_deg: f32,
}

impl DoorSettings {
    /// Settings for a door opening forward or backward.
    pub fn from_config(config: &DoorConfig, open_backward: bool) -> Self {
        Self {
            open_duration: config.open_duration_secs,
            open_offset_deg: if open_backward {
                config.backward_offset_deg
            } else {
                config.forward_offset_deg
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Two-button condition
// ---------------------------------------------------------------------------

/// Which of the door's two buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// First button.
    A,
    /// Second button.
    B,
}

/// One button's contribution: pressed state and who pressed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Contribution {
    /// Button is down.
    pub pressed: bool,
    /// Participant recorded as presser.
    pub holder: Option<ParticipantId>,
}

/// Two contributions that activate only when both are pressed by different
/// participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DualCondition {
    /// Contribution of button A.
    pub a: Contribution,
    /// Contribution of button B.
    pub b: Contribution,
}

impl DualCondition {
    /// Replaces one side's contribution.
    pub fn set(&mut self, side: Side, contribution: Contribution) {
        match side {
            Side::A => self.a = contribution,
            Side::B => self.b = contribution,
        }
    }

    /// Both pressed, both holders known, holders differ.
    pub fn is_active(&self) -> bool {
        self.a.pressed
            && self.b.pressed
            && matches!((self.a.holder, self.b.holder), (Some(a), Some(b)) if a != b)
    }
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

/// Authority-only door state. Never replicated.
#[derive(Component, Debug, Clone)]
pub struct DoorAuthority {
    /// Button feeding [`Side::A`].
    pub button_a: Option<WeakEntity>,
    /// Button feeding [`Side::B`].
    pub button_b: Option<WeakEntity>,
    /// Last known contributions.
    pub condition: DualCondition,
    /// `false` when a button reference was missing at spawn.
    pub enabled: bool,
    /// Closing behaviour.
    pub close_policy: ClosePolicy,
    was_active: bool,
}

impl DoorAuthority {
    /// Authority state for a door wired to `button_a` and `button_b`. A door
    /// missing either button is disabled.
    pub fn new(
        button_a: Option<WeakEntity>,
        button_b: Option<WeakEntity>,
        close_policy: ClosePolicy,
    ) -> Self {
        Self {
            enabled: button_a.is_some() && button_b.is_some(),
            button_a,
            button_b,
            condition: DualCondition::default(),
            close_policy,
            was_active: false,
        }
    }

    /// Which side `button` feeds, if any.
    pub fn side_of(&self, button: Entity) -> Option<Side> {
        if self.button_a.map(|w| w.entity()) == Some(button) {
            Some(Side::A)
        } else if self.button_b.map(|w| w.entity()) == Some(button) {
            Some(Side::B)
        } else {
            None
        }
    }
}

/// A state change the authority made to a door.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorTransition {
    /// Closed → Open.
    Opened,
    /// Open → Closed.
    Closed,
}

/// Current open flag, `false` for anything that is not a door.
pub fn is_open(world: &World, door: Entity) -> bool {
    world.get::<DoorOpen>(door).is_some_and(|o| o.0)
}

/// Opens the door. No-op returning `false` if it is already open.
pub fn open_door(world: &mut World, door: Entity) -> bool {
    set_open(world, door, true)
}

/// Closes the door. No-op returning `false` if it is already closed.
pub fn close_door(world: &mut World, door: Entity) -> bool {
    set_open(world, door, false)
}

fn set_open(world: &mut World, door: Entity, open: bool) -> bool {
    match world.get_mut::<DoorOpen>(door) {
        Some(mut current) if current.0 != open => current.0 = open,
        _ => return false,
    }
    info!(?door, open, "door state changed");
    play_door(world, door);
    true
}

/// Records a button change and applies the resulting edge, if any.
pub fn on_button_state_changed(
    world: &mut World,
    door: Entity,
    button: Entity,
    contribution: Contribution,
) -> Option<DoorTransition> {
    let (was_active, active, policy) = {
        let mut authority = world.get_mut::<DoorAuthority>(door)?;
        if !authority.enabled {
            return None;
        }
        let side = authority.side_of(button)?;
        authority.condition.set(side, contribution);
        let active = authority.condition.is_active();
        let was_active = std::mem::replace(&mut authority.was_active, active);
        (was_active, active, authority.close_policy)
    };
    debug!(?door, ?button, ?contribution, active, "door condition updated");

    match (was_active, active) {
        (false, true) => open_door(world, door).then_some(DoorTransition::Opened),
        (true, false) if policy == ClosePolicy::OnConditionLost => {
            close_door(world, door).then_some(DoorTransition::Closed)
        }
        _ => None,
    }
}

fn door_authority(world: &World, door: Entity) -> Result<&DoorAuthority, Rejection> {
    world
        .get::<DoorAuthority>(door)
        .ok_or(Rejection::Target(HandleError::MissingComponent(door)))
}

/// Open request check: enabled, closed, condition holds.
pub fn validate_open(world: &World, door: Entity) -> Result<(), Rejection> {
    let authority = door_authority(world, door)?;
    if !authority.enabled {
        return Err(Rejection::DoorDisabled);
    }
    if is_open(world, door) {
        return Err(Rejection::AlreadyOpen);
    }
    if !authority.condition.is_active() {
        return Err(Rejection::ConditionNotMet);
    }
    Ok(())
}

/// Close request check: enabled and open.
pub fn validate_close(world: &World, door: Entity) -> Result<(), Rejection> {
    if !door_authority(world, door)?.enabled {
        return Err(Rejection::DoorDisabled);
    }
    if !is_open(world, door) {
        return Err(Rejection::AlreadyClosed);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Presentation
// ---------------------------------------------------------------------------

/// Notify hook for [`DoorOpen`].
pub fn on_rep_door_open(world: &mut World, door: Entity) {
    play_door(world, door);
}

/// Starts the swing matching the current open flag, building the swing on
/// first use from [`DoorSettings`] and the closed [`Transform`].
pub fn play_door(world: &mut World, door: Entity) {
    let Some(open) = world.get::<DoorOpen>(door).map(|o| o.0) else {
        return;
    };
    if world.get::<DoorSwing>(door).is_none() {
        let (Some(settings), Some(transform)) = (
            world.get::<DoorSettings>(door).copied(),
            world.get::<Transform>(door).copied(),
        ) else {
            debug!(?door, "door swing skipped until settings arrive");
            return;
        };
        let closed = transform.rotation.yaw;
        let swing = Interpolator::new(
            closed,
            closed + settings.open_offset_deg,
            settings.open_duration,
        );
        if let Ok(mut entity) = world.get_entity_mut(door) {
            entity.insert(DoorSwing(swing));
        }
    }
    if let Some(mut swing) = world.get_mut::<DoorSwing>(door) {
        swing.0.play(if open {
            Direction::Forward
        } else {
            Direction::Backward
        });
    }
}

/// Presented hinge yaw, if the door has started presenting.
pub fn presented_yaw(world: &World, door: Entity) -> Option<f32> {
    world.get::<DoorSwing>(door).map(|s| s.0.current())
}

#[cfg(test)]
#[path = "door_tests.rs"]
mod tests;
