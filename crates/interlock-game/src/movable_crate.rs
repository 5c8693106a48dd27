//! Movable crate: one participant at a time drags it around the floor.
//!
//! While dragged the body stops simulating, gravity is off and the height
//! is locked to the value captured when the drag began. Ending a drag
//! restores the default constraint at once; gravity and simulation come back
//! only after the settle delay, driven by a timer the authority owns.

use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3};
use interlock_config::CrateConfig;
use interlock_net::{HandleError, NetOwner, ParticipantId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commands::Rejection;
use crate::spatial::Transform;

/// Replicated drag holder. `None` means the crate is free.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DragHolder(pub Option<ParticipantId>);

/// Static per-crate drag settings.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct CrateSettings {
    /// Maximum planar requester distance to begin a drag.
    pub max_drag_distance: f32,
    /// Interpolation speed toward the drag target.
    pub drag_interp_speed: f32,
    /// Seconds before gravity and simulation return.
    pub settle_delay: f64,
    /// Linear damping while dragged.
    pub drag_linear_damping: f32,
}

impl From<&CrateConfig> for CrateSettings {
    fn from(config: &CrateConfig) -> Self {
        Self {
            max_drag_distance: config.max_drag_distance,
            drag_interp_speed: config.drag_interp_speed,
            settle_delay: config.settle_delay_secs,
            drag_linear_damping: config.drag_linear_damping,
        }
    }
}

/// Degrees of freedom the physics body is constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstraintMode {
    /// Whatever the level configured.
    #[default]
    Default,
    /// Free in all six degrees of freedom.
    SixDof,
}

/// Physics body flags the drag toggles.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct RigidBody {
    /// Body is simulated.
    pub simulate_physics: bool,
    /// Gravity applies.
    pub gravity_enabled: bool,
    /// Active constraint.
    pub constraint: ConstraintMode,
    /// Linear damping.
    pub linear_damping: f32,
}

impl RigidBody {
    /// A body resting under gravity.
    pub fn simulated() -> Self {
        Self {
            simulate_physics: true,
            gravity_enabled: true,
            constraint: ConstraintMode::Default,
            linear_damping: 0.0,
        }
    }

    /// A body placed kinematically.
    pub fn kinematic() -> Self {
        Self {
            simulate_physics: false,
            ..Self::simulated()
        }
    }
}

/// Authority-only bookkeeping for the current or last drag.
#[derive(Component, Debug, Clone, Copy, PartialEq, Default)]
pub struct DragState {
    /// Height captured at drag begin.
    pub locked_z: f32,
    /// Whether the body simulated before the drag began.
    pub was_simulating: bool,
    /// A settle restore is armed and has not run.
    pub settle_pending: bool,
}

/// Exponential approach of `current` toward `target` at `speed` per second.
pub fn interp_to(current: Vec3, target: Vec3, dt: f32, speed: f32) -> Vec3 {
    if speed <= 0.0 {
        return target;
    }
    let delta = target - current;
    if delta.length_squared() < 1e-8 {
        return target;
    }
    current + delta * (dt * speed).clamp(0.0, 1.0)
}

/// Current holder, `None` when free or not a crate.
pub fn holder(world: &World, crate_entity: Entity) -> Option<ParticipantId> {
    world.get::<DragHolder>(crate_entity).and_then(|h| h.0)
}

fn missing(entity: Entity) -> Rejection {
    Rejection::Target(HandleError::MissingComponent(entity))
}

/// Begin-drag check for a requester standing at `requester_location`.
/// The distance limit is planar and inclusive.
pub fn validate_begin(
    world: &World,
    crate_entity: Entity,
    requester_location: Vec3,
) -> Result<(), Rejection> {
    let drag_holder = world
        .get::<DragHolder>(crate_entity)
        .ok_or_else(|| missing(crate_entity))?;
    if let Some(current) = drag_holder.0 {
        return Err(Rejection::AlreadyDragged(current));
    }
    let settings = world
        .get::<CrateSettings>(crate_entity)
        .ok_or_else(|| missing(crate_entity))?;
    let location = world
        .get::<Transform>(crate_entity)
        .ok_or_else(|| missing(crate_entity))?
        .location;

    let planar = Vec2::new(location.x - requester_location.x, location.y - requester_location.y);
    let max = settings.max_drag_distance;
    if planar.length_squared() > max * max {
        return Err(Rejection::OutOfRange {
            distance: planar.length(),
            max,
        });
    }
    Ok(())
}

/// Update/end check: the crate must be dragged.
pub fn validate_dragged(world: &World, crate_entity: Entity) -> Result<(), Rejection> {
    match world.get::<DragHolder>(crate_entity) {
        None => Err(missing(crate_entity)),
        Some(DragHolder(None)) => Err(Rejection::NotDragged),
        Some(DragHolder(Some(_))) => Ok(()),
    }
}

/// Hands the crate to `requester` and suspends simulation.
pub fn begin_drag(world: &mut World, crate_entity: Entity, requester: ParticipantId) {
    let Some(location) = world.get::<Transform>(crate_entity).map(|t| t.location) else {
        return;
    };
    let Some(damping) = world
        .get::<CrateSettings>(crate_entity)
        .map(|s| s.drag_linear_damping)
    else {
        return;
    };
    let Ok(mut entity) = world.get_entity_mut(crate_entity) else {
        return;
    };

    let mut body = entity.get::<RigidBody>().copied().unwrap_or_else(RigidBody::simulated);
    let mut state = entity.get::<DragState>().copied().unwrap_or_default();
    if !state.settle_pending {
        state.was_simulating = body.simulate_physics;
    }
    state.locked_z = location.z;

    body.simulate_physics = false;
    body.gravity_enabled = false;
    body.constraint = ConstraintMode::SixDof;
    body.linear_damping = damping;

    entity.insert((body, state, DragHolder(Some(requester)), NetOwner(requester)));
    info!(crate_entity = ?crate_entity, %requester, locked_z = location.z, "drag began");
}

/// Moves the dragged crate toward `target`, keeping the locked height.
pub fn update_drag(world: &mut World, crate_entity: Entity, target: Vec3, dt: f32) {
    let (Some(state), Some(settings)) = (
        world.get::<DragState>(crate_entity).copied(),
        world.get::<CrateSettings>(crate_entity).copied(),
    ) else {
        return;
    };
    let Some(mut transform) = world.get_mut::<Transform>(crate_entity) else {
        return;
    };
    let goal = Vec3::new(target.x, target.y, state.locked_z);
    let mut next = interp_to(transform.location, goal, dt, settings.drag_interp_speed);
    next.z = state.locked_z;
    transform.location = next;
}

/// Releases the crate. Returns the settle delay the caller must arm, or
/// `None` if the crate was not dragged.
pub fn end_drag(world: &mut World, crate_entity: Entity) -> Option<f64> {
    let settle_delay = world.get::<CrateSettings>(crate_entity)?.settle_delay;
    let mut entity = world.get_entity_mut(crate_entity).ok()?;
    let previous = entity.get::<DragHolder>()?.0?;

    if let Some(mut body) = entity.get_mut::<RigidBody>() {
        body.constraint = ConstraintMode::Default;
        body.linear_damping = 0.0;
    }
    if let Some(mut state) = entity.get_mut::<DragState>() {
        state.settle_pending = true;
    }
    entity.insert(DragHolder(None));
    entity.remove::<NetOwner>();
    info!(crate_entity = ?crate_entity, %previous, "drag ended");
    Some(settle_delay)
}

/// Settle timer body: gravity back on, simulation back only if it ran before
/// the drag. Skipped if a new drag is in progress.
pub fn settle(world: &mut World, crate_entity: Entity) {
    let dragged = holder(world, crate_entity).is_some();
    let Ok(mut entity) = world.get_entity_mut(crate_entity) else {
        debug!(?crate_entity, "settle skipped for expired crate");
        return;
    };
    let Some(mut state) = entity.get_mut::<DragState>() else {
        return;
    };
    state.settle_pending = false;
    let was_simulating = state.was_simulating;
    if dragged {
        debug!(?crate_entity, "settle skipped while dragged");
        return;
    }
    if let Some(mut body) = entity.get_mut::<RigidBody>() {
        body.gravity_enabled = true;
        body.simulate_physics = was_simulating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ParticipantId = ParticipantId(1);
    const BOB: ParticipantId = ParticipantId(2);

    fn spawn_crate(world: &mut World, body: RigidBody) -> Entity {
        world
            .spawn((
                DragHolder(None),
                CrateSettings::from(&CrateConfig::default()),
                Transform::from_location(Vec3::new(0.0, 0.0, 50.0)),
                body,
            ))
            .id()
    }

    #[test]
    fn test_begin_distance_boundary_is_inclusive_and_planar() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        // Height difference does not count.
        assert_eq!(
            validate_begin(&world, crate_entity, Vec3::new(400.0, 0.0, 900.0)),
            Ok(())
        );
        assert!(matches!(
            validate_begin(&world, crate_entity, Vec3::new(400.1, 0.0, 50.0)),
            Err(Rejection::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_second_drag_is_rejected() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        begin_drag(&mut world, crate_entity, ALICE);
        assert_eq!(
            validate_begin(&world, crate_entity, Vec3::ZERO),
            Err(Rejection::AlreadyDragged(ALICE))
        );
        assert_eq!(world.get::<NetOwner>(crate_entity), Some(&NetOwner(ALICE)));
    }

    #[test]
    fn test_begin_suspends_simulation() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        begin_drag(&mut world, crate_entity, ALICE);
        let body = *world.get::<RigidBody>(crate_entity).unwrap();
        assert!(!body.simulate_physics);
        assert!(!body.gravity_enabled);
        assert_eq!(body.constraint, ConstraintMode::SixDof);
        assert_eq!(body.linear_damping, 6.0);
    }

    #[test]
    fn test_update_never_changes_locked_height() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        begin_drag(&mut world, crate_entity, ALICE);
        for target in [
            Vec3::new(100.0, 0.0, 5_000.0),
            Vec3::new(-50.0, 20.0, -300.0),
        ] {
            for _ in 0..30 {
                update_drag(&mut world, crate_entity, target, 1.0 / 60.0);
                assert_eq!(world.get::<Transform>(crate_entity).unwrap().location.z, 50.0);
            }
        }
    }

    #[test]
    fn test_update_moves_exponentially() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        begin_drag(&mut world, crate_entity, ALICE);
        update_drag(&mut world, crate_entity, Vec3::new(100.0, 0.0, 50.0), 0.05);
        let location = world.get::<Transform>(crate_entity).unwrap().location;
        assert!((location.x - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_end_requires_drag_and_restores_constraint() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        assert_eq!(validate_dragged(&world, crate_entity), Err(Rejection::NotDragged));
        assert_eq!(end_drag(&mut world, crate_entity), None);

        begin_drag(&mut world, crate_entity, ALICE);
        assert_eq!(end_drag(&mut world, crate_entity), Some(0.25));
        let body = *world.get::<RigidBody>(crate_entity).unwrap();
        assert_eq!(body.constraint, ConstraintMode::Default);
        assert_eq!(body.linear_damping, 0.0);
        // Gravity waits for the settle delay.
        assert!(!body.gravity_enabled);
        assert_eq!(holder(&world, crate_entity), None);
        assert!(world.get::<NetOwner>(crate_entity).is_none());
    }

    #[test]
    fn test_settle_restores_simulation_only_if_it_ran_before() {
        for (body, expected) in [(RigidBody::simulated(), true), (RigidBody::kinematic(), false)] {
            let mut world = World::new();
            let crate_entity = spawn_crate(&mut world, body);
            begin_drag(&mut world, crate_entity, ALICE);
            end_drag(&mut world, crate_entity);
            settle(&mut world, crate_entity);
            let body = *world.get::<RigidBody>(crate_entity).unwrap();
            assert!(body.gravity_enabled);
            assert_eq!(body.simulate_physics, expected);
        }
    }

    #[test]
    fn test_regrab_before_settle_keeps_original_flag() {
        let mut world = World::new();
        let crate_entity = spawn_crate(&mut world, RigidBody::simulated());
        begin_drag(&mut world, crate_entity, ALICE);
        end_drag(&mut world, crate_entity);
        // Grabbed again before the restore ran: the body is not simulating
        // right now, but it was before the first drag.
        begin_drag(&mut world, crate_entity, BOB);
        settle(&mut world, crate_entity);
        assert!(!world.get::<RigidBody>(crate_entity).unwrap().simulate_physics);

        end_drag(&mut world, crate_entity);
        settle(&mut world, crate_entity);
        assert!(world.get::<RigidBody>(crate_entity).unwrap().simulate_physics);
    }
}
