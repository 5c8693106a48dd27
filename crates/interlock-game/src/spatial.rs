//! Positions and orientations shared by every level entity.
//!
//! Axes follow the level data: X forward, Y right, Z up, angles in degrees.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Wraps an angle in degrees into `(-180, 180]`.
pub fn normalize_axis(deg: f32) -> f32 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// Pitch/yaw/roll in degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotator {
    /// Rotation about Y, positive looks up.
    pub pitch: f32,
    /// Rotation about Z.
    pub yaw: f32,
    /// Rotation about X.
    pub roll: f32,
}

impl Rotator {
    /// No rotation.
    pub const ZERO: Self = Self {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    /// Builds a rotator from its three angles.
    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// A pure yaw rotation.
    pub fn from_yaw(yaw: f32) -> Self {
        Self::new(0.0, yaw, 0.0)
    }

    /// The rotation whose forward vector points along `direction`.
    pub fn from_direction(direction: Vec3) -> Self {
        let horizontal = direction.truncate().length();
        Self::new(
            direction.z.atan2(horizontal).to_degrees(),
            direction.y.atan2(direction.x).to_degrees(),
            0.0,
        )
    }

    /// Each axis wrapped into `(-180, 180]`.
    pub fn normalized(self) -> Self {
        Self::new(
            normalize_axis(self.pitch),
            normalize_axis(self.yaw),
            normalize_axis(self.roll),
        )
    }

    /// Shortest signed difference `self - other`, per axis.
    pub fn delta(self, other: Self) -> Self {
        Self::new(
            self.pitch - other.pitch,
            self.yaw - other.yaw,
            self.roll - other.roll,
        )
        .normalized()
    }

    /// Unit view direction.
    pub fn forward(self) -> Vec3 {
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(cp * cy, cp * sy, sp)
    }

    /// Unit right direction in the horizontal plane.
    pub fn right(self) -> Vec3 {
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(-sy, cy, 0.0)
    }
}

/// World placement of an entity.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    /// Position in world units.
    pub location: Vec3,
    /// Orientation.
    pub rotation: Rotator,
}

impl Transform {
    /// A transform at `location` with no rotation.
    pub fn from_location(location: Vec3) -> Self {
        Self {
            location,
            rotation: Rotator::ZERO,
        }
    }

    /// Same transform with `rotation`.
    pub fn with_rotation(mut self, rotation: Rotator) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Where a character is looking from, as used by interaction checks.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct View {
    /// Camera position.
    pub origin: Vec3,
    /// Camera direction. Need not be normalized.
    pub forward: Vec3,
}

impl View {
    /// A view from `origin` toward `target`.
    pub fn looking_at(origin: Vec3, target: Vec3) -> Self {
        Self {
            origin,
            forward: target - origin,
        }
    }
}
