//! Level layouts: what the authority spawns when a map loads.

use glam::Vec3;

use crate::spatial::Transform;

/// A door and the indices of its two buttons in [`LevelLayout::buttons`].
#[derive(Debug, Clone, PartialEq)]
pub struct DoorPlacement {
    /// Closed door transform; the hinge yaw is `rotation.yaw`.
    pub transform: Transform,
    /// Button A and button B. `None` leaves the door without that button.
    pub buttons: [Option<usize>; 2],
    /// Swing backward instead of forward.
    pub open_backward: bool,
}

/// Static content of one map.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelLayout {
    /// Map name.
    pub name: String,
    /// Pressure button transforms.
    pub buttons: Vec<Transform>,
    /// Doors.
    pub doors: Vec<DoorPlacement>,
    /// Crate resting locations.
    pub crates: Vec<Vec3>,
    /// Character spawn points, used round-robin.
    pub spawn_points: Vec<Transform>,
}

impl LevelLayout {
    /// A map with nothing in it.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buttons: Vec::new(),
            doors: Vec::new(),
            crates: Vec::new(),
            spawn_points: Vec::new(),
        }
    }

    /// The interlock room: two buttons either side of a corridor, a door at
    /// its end and one crate.
    pub fn interlock_room(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buttons: vec![
                Transform::from_location(Vec3::new(300.0, -250.0, 100.0)),
                Transform::from_location(Vec3::new(300.0, 250.0, 100.0)),
            ],
            doors: vec![DoorPlacement {
                transform: Transform::from_location(Vec3::new(700.0, 0.0, 0.0)),
                buttons: [Some(0), Some(1)],
                open_backward: false,
            }],
            crates: vec![Vec3::new(0.0, 500.0, 50.0)],
            spawn_points: vec![
                Transform::from_location(Vec3::new(0.0, -250.0, 90.0)),
                Transform::from_location(Vec3::new(0.0, 250.0, 90.0)),
                Transform::from_location(Vec3::new(-200.0, 0.0, 90.0)),
            ],
        }
    }

    /// Spawn point for the `index`-th character.
    pub fn spawn_point(&self, index: usize) -> Transform {
        if self.spawn_points.is_empty() {
            return Transform::default();
        }
        self.spawn_points[index % self.spawn_points.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_points_wrap() {
        let layout = LevelLayout::interlock_room("room");
        assert_eq!(layout.spawn_point(3), layout.spawn_point(0));
        assert_eq!(LevelLayout::empty("x").spawn_point(5), Transform::default());
    }
}
