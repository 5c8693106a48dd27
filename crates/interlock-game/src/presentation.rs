//! Local presentation interpolation.
//!
//! When an observer learns of a state change, whether decided locally or
//! received through replication, it starts a phase toward the matching pose.
//! The starting alpha is recovered by projecting the currently presented pose
//! onto the rest→target range, so a reversal mid-swing continues from where
//! the part actually is. Presentation never feeds back into authoritative
//! state.

use std::fmt::Debug;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::movable_crate::interp_to;
use crate::spatial::{Transform, normalize_axis};

/// Which pose a phase moves toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the target pose (opening, pressing).
    Forward,
    /// Toward the rest pose (closing, releasing).
    Backward,
}

/// Progress of one presentation phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationPhase {
    direction: Option<Direction>,
    alpha: f32,
    duration: f32,
}

impl InterpolationPhase {
    /// An idle phase at alpha 0 with the given full-travel duration.
    pub fn new(duration: f32) -> Self {
        Self {
            direction: None,
            alpha: 0.0,
            duration,
        }
    }

    /// Starts moving in `direction` from `alpha`.
    pub fn start(&mut self, direction: Direction, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
        self.direction = Some(direction);
    }

    /// Advances by `dt` seconds. Reaching a bound clamps alpha and ends the
    /// phase. Returns `true` if alpha moved.
    pub fn advance(&mut self, dt: f32) -> bool {
        let Some(direction) = self.direction else {
            return false;
        };
        let before = self.alpha;
        let step = if self.duration > 0.0 {
            dt.max(0.0) / self.duration
        } else {
            1.0
        };
        let (next, bound) = match direction {
            Direction::Forward => ((self.alpha + step).min(1.0), 1.0),
            Direction::Backward => ((self.alpha - step).max(0.0), 0.0),
        };
        self.alpha = next;
        if next == bound {
            self.direction = None;
        }
        next != before
    }

    /// Current blend factor in `[0, 1]`.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Active direction, `None` when idle.
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Returns `true` while a phase is running.
    pub fn is_active(&self) -> bool {
        self.direction.is_some()
    }
}

/// A pose that can be blended linearly and projected back onto its range.
pub trait Pose: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Linear blend between `rest` and `target`.
    fn blend(rest: Self, target: Self, alpha: f32) -> Self;

    /// Where `current` lies on the `rest`→`target` range, `None` if the
    /// range is degenerate.
    fn progress(rest: Self, target: Self, current: Self) -> Option<f32>;
}

/// Hinge yaw in degrees.
impl Pose for f32 {
    fn blend(rest: Self, target: Self, alpha: f32) -> Self {
        rest + (target - rest) * alpha
    }

    fn progress(rest: Self, target: Self, current: Self) -> Option<f32> {
        let total = target - rest;
        if total.abs() <= f32::EPSILON {
            return None;
        }
        Some((normalize_axis(current - rest) / total).clamp(0.0, 1.0))
    }
}

/// Location along a straight travel.
impl Pose for Vec3 {
    fn blend(rest: Self, target: Self, alpha: f32) -> Self {
        rest.lerp(target, alpha)
    }

    fn progress(rest: Self, target: Self, current: Self) -> Option<f32> {
        let axis = target - rest;
        let length_sq = axis.length_squared();
        if length_sq <= f32::EPSILON {
            return None;
        }
        Some(((current - rest).dot(axis) / length_sq).clamp(0.0, 1.0))
    }
}

/// Presented pose of one moving part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolator<P> {
    rest: P,
    target: P,
    current: P,
    phase: InterpolationPhase,
}

impl<P: Pose> Interpolator<P> {
    /// A part presented at `rest`, travelling to `target` in `duration` seconds.
    pub fn new(rest: P, target: P, duration: f32) -> Self {
        Self {
            rest,
            target,
            current: rest,
            phase: InterpolationPhase::new(duration),
        }
    }

    /// Starts moving toward the pose selected by `direction`. Playing the
    /// direction already running does not restart it. Returns `true` if a
    /// phase was started.
    pub fn play(&mut self, direction: Direction) -> bool {
        if self.phase.direction() == Some(direction) {
            return false;
        }
        match P::progress(self.rest, self.target, self.current) {
            Some(alpha) => {
                self.phase.start(direction, alpha);
                true
            }
            None => {
                self.phase = InterpolationPhase::new(self.phase.duration);
                false
            }
        }
    }

    /// Advances the running phase and returns the presented pose.
    pub fn step(&mut self, dt: f32) -> P {
        if self.phase.advance(dt) {
            self.current = P::blend(self.rest, self.target, self.phase.alpha());
        }
        self.current
    }

    /// Pose as presented right now.
    pub fn current(&self) -> P {
        self.current
    }

    /// Overrides the presented pose, e.g. when snapping to a replicated value.
    pub fn set_current(&mut self, pose: P) {
        self.current = pose;
    }

    /// Current blend factor.
    pub fn alpha(&self) -> f32 {
        self.phase.alpha()
    }

    /// Active direction, `None` when idle.
    pub fn direction(&self) -> Option<Direction> {
        self.phase.direction()
    }

    /// Returns `true` while moving.
    pub fn is_moving(&self) -> bool {
        self.phase.is_active()
    }
}

/// Door hinge presentation.
#[derive(Component, Debug, Clone, Copy)]
pub struct DoorSwing(pub Interpolator<f32>);

/// Button cap presentation.
#[derive(Component, Debug, Clone, Copy)]
pub struct ButtonTravel(pub Interpolator<Vec3>);

/// Scale the character is drawn at.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct PresentedScale(pub f32);

/// Location a replicated body is drawn at. It chases the replicated
/// [`Transform`] instead of snapping to each update.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct LocationGlide {
    /// Drawn location.
    pub presented: Vec3,
    /// Interpolation speed, as in [`interp_to`].
    pub speed: f32,
}

impl LocationGlide {
    /// Starts at `location` with no lag.
    pub fn at(location: Vec3, speed: f32) -> Self {
        Self {
            presented: location,
            speed,
        }
    }
}

/// Advances every running presentation phase in `world` by `dt`.
pub fn step_presentation(world: &mut World, dt: f32) {
    let mut swings = world.query::<&mut DoorSwing>();
    for mut swing in swings.iter_mut(world) {
        if swing.0.is_moving() {
            swing.0.step(dt);
        }
    }
    let mut travels = world.query::<&mut ButtonTravel>();
    for mut travel in travels.iter_mut(world) {
        if travel.0.is_moving() {
            travel.0.step(dt);
        }
    }
    let mut glides = world.query::<(&Transform, &mut LocationGlide)>();
    for (transform, mut glide) in glides.iter_mut(world) {
        if glide.presented != transform.location {
            glide.presented = interp_to(glide.presented, transform.location, dt, glide.speed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_alpha_advances_by_dt_over_duration() {
        let mut door = Interpolator::new(0.0f32, 90.0, 1.0);
        assert!(door.play(Direction::Forward));
        assert!(approx(door.step(0.25), 22.5));
        assert!(approx(door.alpha(), 0.25));
        assert!(door.is_moving());
    }

    #[test]
    fn test_alpha_clamps_and_phase_halts() {
        let mut door = Interpolator::new(0.0f32, 90.0, 1.0);
        door.play(Direction::Forward);
        door.step(0.75);
        assert!(approx(door.step(0.75), 90.0));
        assert_eq!(door.alpha(), 1.0);
        assert!(!door.is_moving());
        // Further steps hold the pose.
        assert_eq!(door.step(1.0), 90.0);
    }

    #[test]
    fn test_reversal_starts_from_current_alpha() {
        let mut door = Interpolator::new(10.0f32, -80.0, 1.0);
        door.play(Direction::Forward);
        door.step(0.4);
        assert!(approx(door.alpha(), 0.4));

        assert!(door.play(Direction::Backward));
        assert!(approx(door.alpha(), 0.4));
        door.step(0.1);
        assert!(approx(door.alpha(), 0.3));
        assert!(approx(door.current(), 10.0 - 90.0 * 0.3));
    }

    #[test]
    fn test_replaying_running_direction_does_not_restart() {
        let mut door = Interpolator::new(0.0f32, 90.0, 1.0);
        door.play(Direction::Forward);
        door.step(0.5);
        assert!(!door.play(Direction::Forward));
        assert!(approx(door.alpha(), 0.5));
    }

    #[test]
    fn test_vector_pose_projects_onto_travel() {
        let rest = Vec3::new(0.0, 0.0, 50.0);
        let pressed = Vec3::new(0.0, -30.0, 50.0);
        let mut cap = Interpolator::new(rest, pressed, 0.2);
        cap.set_current(Vec3::new(5.0, -15.0, 50.0));
        cap.play(Direction::Backward);
        assert!(approx(cap.alpha(), 0.5));
        let pose = cap.step(0.05);
        assert!(pose.abs_diff_eq(Vec3::new(0.0, -7.5, 50.0), 1e-4));
    }

    #[test]
    fn test_degenerate_range_stays_idle() {
        let mut still = Interpolator::new(Vec3::ONE, Vec3::ONE, 1.0);
        assert!(!still.play(Direction::Forward));
        assert!(!still.is_moving());
        assert_eq!(still.alpha(), 0.0);
    }

    #[test]
    fn test_glide_lags_then_converges() {
        let mut world = World::new();
        let body = world
            .spawn((Transform::default(), LocationGlide::at(Vec3::ZERO, 8.0)))
            .id();
        world.get_mut::<Transform>(body).unwrap().location = Vec3::new(100.0, 0.0, 0.0);

        step_presentation(&mut world, 1.0 / 60.0);
        let first = world.get::<LocationGlide>(body).unwrap().presented;
        assert!(first.x > 0.0 && first.x < 50.0, "presented {first}");
        assert_eq!(first.y, 0.0);

        for _ in 0..180 {
            step_presentation(&mut world, 1.0 / 60.0);
        }
        let settled = world.get::<LocationGlide>(body).unwrap().presented;
        assert!(settled.distance(Vec3::new(100.0, 0.0, 0.0)) < 0.01);
    }

    #[test]
    fn test_phase_alpha_stays_in_unit_interval() {
        let mut phase = InterpolationPhase::new(0.3);
        phase.start(Direction::Backward, 1.7);
        assert_eq!(phase.alpha(), 1.0);
        phase.advance(10.0);
        assert_eq!(phase.alpha(), 0.0);
        assert!(!phase.is_active());
    }
}
