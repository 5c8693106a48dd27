//! Pressure button.
//!
//! Pressing records the presser; releasing clears the presser only when the
//! releaser is the one recorded, although the pressed flag flips either way.
//! State changes are forwarded to the doors listening on the button.

use bevy_ecs::prelude::*;
use glam::Vec3;
use interlock_config::ButtonConfig;
use interlock_net::{HandleError, ParticipantId, WeakEntity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commands::Rejection;
use crate::door::Contribution;
use crate::presentation::{ButtonTravel, Direction, Interpolator};
use crate::spatial::{Transform, View};

/// Slack on the view-cone boundary so a requester aimed exactly at the
/// limit is not refused by float rounding.
pub const ANGLE_TOLERANCE_DEG: f32 = 1e-3;

/// Replicated pressed flag.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonPressed(pub bool);

/// Replicated presser identity.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PressedBy(pub Option<ParticipantId>);

/// Static per-button settings, replicated once at spawn.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ButtonSettings {
    /// Seconds for the cap to travel fully.
    pub press_duration: f32,
    /// Distance the cap sinks.
    pub press_depth: f32,
    /// Maximum view-origin distance for an interaction.
    pub max_interact_distance: f32,
    /// Maximum angle between view direction and the button, in degrees.
    pub max_interact_angle_deg: f32,
}

impl From<&ButtonConfig> for ButtonSettings {
    fn from(config: &ButtonConfig) -> Self {
        Self {
            press_duration: config.press_duration_secs,
            press_depth: config.press_depth,
            max_interact_distance: config.max_interact_distance,
            max_interact_angle_deg: config.max_interact_angle_deg,
        }
    }
}

/// Doors notified on the authority when this button changes.
#[derive(Component, Debug, Clone, Default)]
pub struct ButtonListeners(pub Vec<WeakEntity>);

/// Emitted by [`set_pressed`] when the pressed flag flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonStateChanged {
    /// The button.
    pub button: Entity,
    /// New pressed flag.
    pub pressed: bool,
    /// Presser after the change.
    pub presser: Option<ParticipantId>,
}

impl ButtonStateChanged {
    /// What listening doors record for this button.
    pub fn contribution(&self) -> Contribution {
        Contribution {
            pressed: self.pressed,
            holder: self.presser,
        }
    }
}

/// Where the cap sits when fully pressed.
pub fn pressed_location(transform: &Transform, settings: &ButtonSettings) -> Vec3 {
    transform.location - transform.rotation.right() * settings.press_depth
}

/// Range and view-cone check for a requester looking from `view`. Both
/// limits are inclusive.
pub fn check_interaction(
    settings: &ButtonSettings,
    button_location: Vec3,
    view: &View,
) -> Result<(), Rejection> {
    let to_button = button_location - view.origin;
    let max = settings.max_interact_distance;
    if to_button.length_squared() > max * max {
        return Err(Rejection::OutOfRange {
            distance: to_button.length(),
            max,
        });
    }

    let cos = view
        .forward
        .normalize_or_zero()
        .dot(to_button.normalize_or_zero())
        .clamp(-1.0, 1.0);
    let angle = cos.acos().to_degrees();
    if angle > settings.max_interact_angle_deg + ANGLE_TOLERANCE_DEG {
        return Err(Rejection::OutsideViewCone {
            angle,
            max: settings.max_interact_angle_deg,
        });
    }
    Ok(())
}

/// Checks whether the requester viewing from `view` may press `button`.
pub fn validate_interaction(world: &World, button: Entity, view: &View) -> Result<(), Rejection> {
    let settings = world
        .get::<ButtonSettings>(button)
        .ok_or(Rejection::Target(HandleError::MissingComponent(button)))?;
    let location = world
        .get::<Transform>(button)
        .map(|t| t.location)
        .ok_or(Rejection::Target(HandleError::MissingComponent(button)))?;
    check_interaction(settings, location, view)
}

/// Current pressed flag, `false` for anything that is not a button.
pub fn is_pressed(world: &World, button: Entity) -> bool {
    world.get::<ButtonPressed>(button).is_some_and(|p| p.0)
}

/// Recorded presser.
pub fn presser(world: &World, button: Entity) -> Option<ParticipantId> {
    world.get::<PressedBy>(button).and_then(|p| p.0)
}

/// Authority write of the pressed flag on behalf of `requester`.
///
/// Setting the current value is a no-op. Returns the change for listeners.
pub fn set_pressed(
    world: &mut World,
    button: Entity,
    pressed: bool,
    requester: ParticipantId,
) -> Option<ButtonStateChanged> {
    if world.get::<ButtonPressed>(button)?.0 == pressed {
        return None;
    }

    {
        let mut recorded = world.get_mut::<PressedBy>(button)?;
        if pressed {
            recorded.0 = Some(requester);
        } else if recorded.0 == Some(requester) {
            recorded.0 = None;
        } else {
            debug!(?button, %requester, presser = ?recorded.0, "release by non-presser keeps presser");
        }
    }
    world.get_mut::<ButtonPressed>(button)?.0 = pressed;
    info!(?button, pressed, %requester, "button state changed");
    play_button(world, button);

    Some(ButtonStateChanged {
        button,
        pressed,
        presser: presser(world, button),
    })
}

/// Doors currently listening on `button` that are still alive.
pub fn listeners(world: &World, button: Entity) -> Vec<Entity> {
    world
        .get::<ButtonListeners>(button)
        .map(|l| {
            l.0.iter()
                .filter_map(|weak| weak.upgrade(world).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Notify hook for [`ButtonPressed`].
pub fn on_rep_pressed(world: &mut World, button: Entity) {
    play_button(world, button);
}

/// Starts the cap travel matching the pressed flag.
pub fn play_button(world: &mut World, button: Entity) {
    let Some(pressed) = world.get::<ButtonPressed>(button).map(|p| p.0) else {
        return;
    };
    if world.get::<ButtonTravel>(button).is_none() {
        let (Some(settings), Some(transform)) = (
            world.get::<ButtonSettings>(button).copied(),
            world.get::<Transform>(button).copied(),
        ) else {
            return;
        };
        let travel = Interpolator::new(
            transform.location,
            pressed_location(&transform, &settings),
            settings.press_duration,
        );
        if let Ok(mut entity) = world.get_entity_mut(button) {
            entity.insert(ButtonTravel(travel));
        }
    }
    if let Some(mut travel) = world.get_mut::<ButtonTravel>(button) {
        travel.0.play(if pressed {
            Direction::Forward
        } else {
            Direction::Backward
        });
    }
}

/// Presented cap location, if the button has started presenting.
pub fn presented_location(world: &World, button: Entity) -> Option<Vec3> {
    world.get::<ButtonTravel>(button).map(|t| t.0.current())
}
