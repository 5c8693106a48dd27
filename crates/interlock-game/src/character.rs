//! Player character: scale, head look and the interaction view.

use bevy_ecs::prelude::*;
use glam::Vec3;
use interlock_config::CharacterConfig;
use interlock_net::ParticipantId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commands::Rejection;
use crate::presentation::PresentedScale;
use crate::spatial::{Rotator, Transform, View};

/// Camera height above the character origin.
pub const EYE_HEIGHT: f32 = 64.0;

/// Replicated: the participant controlling this character.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pawn(pub ParticipantId);

/// Replicated uniform scale.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CharacterScale(pub f32);

impl Default for CharacterScale {
    fn default() -> Self {
        Self(1.0)
    }
}

/// Replicated head rotation, never sent back to the controlling participant.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadLook(pub Rotator);

/// Static per-character limits.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct CharacterSettings {
    /// Smallest accepted scale.
    pub min_scale: f32,
    /// Largest accepted scale.
    pub max_scale: f32,
    /// Head yaw clamp in degrees.
    pub head_look_limit_deg: f32,
}

impl From<&CharacterConfig> for CharacterSettings {
    fn from(config: &CharacterConfig) -> Self {
        Self {
            min_scale: config.min_scale,
            max_scale: config.max_scale,
            head_look_limit_deg: config.head_look_limit_deg,
        }
    }
}

impl CharacterSettings {
    /// Clamps a requested scale into bounds, as the controlling client does
    /// before asking.
    pub fn clamp_scale(&self, scale: f32) -> f32 {
        scale.clamp(self.min_scale, self.max_scale)
    }

    /// Authority check: inclusive bounds, NaN refused.
    pub fn validate_scale(&self, scale: f32) -> Result<(), Rejection> {
        if (self.min_scale..=self.max_scale).contains(&scale) {
            Ok(())
        } else {
            Err(Rejection::ScaleOutOfBounds {
                scale,
                min: self.min_scale,
                max: self.max_scale,
            })
        }
    }
}

/// Head rotation derived from where the controller looks relative to the
/// body: pitching the view turns the head, clamped to `±limit_deg`.
pub fn head_look_from(control: Rotator, body: Rotator, limit_deg: f32) -> Rotator {
    let delta = control.delta(body);
    Rotator::from_yaw((-delta.pitch).clamp(-limit_deg, limit_deg))
}

/// Camera view for a character at `transform` looking along `control`.
pub fn eye_view(transform: &Transform, control: Rotator) -> View {
    View {
        origin: transform.location + Vec3::Z * EYE_HEIGHT,
        forward: control.forward(),
    }
}

/// Authority write of the character scale.
pub fn set_scale(world: &mut World, character: Entity, scale: f32) {
    let Some(mut current) = world.get_mut::<CharacterScale>(character) else {
        return;
    };
    current.0 = scale;
    info!(?character, scale, "character scale changed");
    on_rep_scale(world, character);
}

/// Notify hook for [`CharacterScale`]: presents the replicated scale.
pub fn on_rep_scale(world: &mut World, character: Entity) {
    let Some(scale) = world.get::<CharacterScale>(character).map(|s| s.0) else {
        return;
    };
    if let Ok(mut entity) = world.get_entity_mut(character) {
        entity.insert(PresentedScale(scale));
    }
}

/// Presented scale, if any.
pub fn presented_scale(world: &World, character: Entity) -> Option<f32> {
    world.get::<PresentedScale>(character).map(|s| s.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn settings() -> CharacterSettings {
        CharacterSettings::from(&CharacterConfig::default())
    }

    #[test]
    fn test_scale_bounds_are_inclusive() {
        let s = settings();
        assert_eq!(s.validate_scale(0.2), Ok(()));
        assert_eq!(s.validate_scale(1.0), Ok(()));
        assert!(s.validate_scale(0.19).is_err());
        assert!(s.validate_scale(1.01).is_err());
        assert!(s.validate_scale(f32::NAN).is_err());
    }

    #[test]
    fn test_head_look_follows_negated_pitch() {
        let body = Rotator::from_yaw(45.0);
        let look = head_look_from(Rotator::new(20.0, 45.0, 0.0), body, 60.0);
        assert_eq!(look, Rotator::from_yaw(-20.0));
        let clamped = head_look_from(Rotator::new(-85.0, 0.0, 0.0), Rotator::ZERO, 60.0);
        assert_eq!(clamped.yaw, 60.0);
    }

    #[test]
    fn test_set_scale_presents_immediately() {
        let mut world = World::new();
        let character = world.spawn(CharacterScale::default()).id();
        set_scale(&mut world, character, 0.5);
        assert_eq!(presented_scale(&world, character), Some(0.5));
    }

    proptest! {
        #[test]
        fn prop_validation_matches_bounds(scale in -2.0f32..3.0) {
            let s = settings();
            prop_assert_eq!(s.validate_scale(scale).is_ok(), (0.2..=1.0).contains(&scale));
        }

        #[test]
        fn prop_clamped_scale_always_validates(scale in prop::num::f32::NORMAL) {
            let s = settings();
            prop_assert!(s.validate_scale(s.clamp_scale(scale)).is_ok());
        }

        #[test]
        fn prop_head_look_stays_within_limit(pitch in -180.0f32..180.0, yaw in -360.0f32..360.0) {
            let look = head_look_from(Rotator::new(pitch, yaw, 0.0), Rotator::from_yaw(yaw), 60.0);
            prop_assert!(look.yaw.abs() <= 60.0);
        }
    }
}
