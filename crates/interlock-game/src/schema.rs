//! The replicated fields of every level entity.

use interlock_net::{FieldSpec, ReplicationSet};

use crate::button::{self, ButtonPressed, ButtonSettings, PressedBy};
use crate::character::{self, CharacterScale, HeadLook, Pawn};
use crate::door::{self, DoorOpen, DoorSettings};
use crate::movable_crate::DragHolder;
use crate::spatial::Transform;

/// Builds the schema shared by the authority and every observer.
pub fn replication_set() -> ReplicationSet {
    let mut set = ReplicationSet::new();
    set.register::<Transform>(FieldSpec::new("transform"))
        .register::<DoorSettings>(FieldSpec::new("door.settings"))
        .register::<DoorOpen>(FieldSpec::new("door.open").with_notify(door::on_rep_door_open))
        .register::<ButtonSettings>(FieldSpec::new("button.settings"))
        .register::<ButtonPressed>(
            FieldSpec::new("button.pressed").with_notify(button::on_rep_pressed),
        )
        .register::<PressedBy>(FieldSpec::new("button.pressed_by"))
        .register::<DragHolder>(FieldSpec::new("crate.holder"))
        .register::<Pawn>(FieldSpec::new("character.pawn"))
        .register::<CharacterScale>(
            FieldSpec::new("character.scale").with_notify(character::on_rep_scale),
        )
        .register::<HeadLook>(FieldSpec::new("character.head_look").skip_owner());
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use interlock_net::ReplicationCondition;

    #[test]
    fn test_head_look_skips_owner() {
        let set = replication_set();
        assert_eq!(set.len(), 10);
        assert_eq!(
            set.field("character.head_look").map(|f| f.condition),
            Some(ReplicationCondition::SkipOwner)
        );
        assert!(set.field("door.open").is_some_and(|f| f.notify.is_some()));
        assert!(set.field("crate.holder").is_some_and(|f| f.notify.is_none()));
    }
}
