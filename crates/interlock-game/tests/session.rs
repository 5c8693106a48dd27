//! End-to-end sessions: a server and clients exchanging real packets over
//! loopback links.

use glam::Vec3;
use interlock_config::Config;
use interlock_game::character::{self, EYE_HEIGHT};
use interlock_game::{AuthorityEvent, LevelLayout, LocalSession, Request, Rotator, Transform};
use interlock_net::ParticipantId;

const DT: f32 = 1.0 / 60.0;
const ALICE_SPOT: Vec3 = Vec3::new(0.0, -250.0, 90.0);
const BOB_SPOT: Vec3 = Vec3::new(0.0, 250.0, 90.0);

fn config(loss: f64) -> Config {
    let mut config = Config::default();
    config.network.link_loss = loss;
    config.network.link_seed = 42;
    config
}

fn room_session(loss: f64) -> (LocalSession, ParticipantId, ParticipantId) {
    let mut session = LocalSession::new(config(loss), LevelLayout::interlock_room("room"));
    let alice = session.connect();
    let bob = session.connect();
    session.run(0.5, DT);
    (session, alice, bob)
}

/// Stands `who` at `spot` on the server and turns their client towards
/// `target`.
fn aim(session: &mut LocalSession, who: ParticipantId, spot: Vec3, target: Vec3) {
    let control = Rotator::from_direction(target - (spot + Vec3::Z * EYE_HEIGHT));
    session
        .server_mut()
        .authority_mut()
        .set_character_pose(who, Transform::from_location(spot), control);
    session.client_mut(who).unwrap().set_control_rotation(control);
}

fn button_location(session: &LocalSession, index: usize) -> Vec3 {
    let authority = session.server().authority();
    let id = authority.level().buttons[index];
    let entity = authority.resolve(id).unwrap();
    authority.world().get::<Transform>(entity).unwrap().location
}

#[test]
fn test_clients_mirror_the_level() {
    let (mut session, alice, bob) = room_session(0.0);
    let level = session.server().authority().level().clone();

    for who in [alice, bob] {
        let client = session.client_mut(who).unwrap();
        assert_eq!(client.doors(), level.doors);
        assert_eq!(client.buttons(), level.buttons);
        assert_eq!(client.crates(), level.crates);
        assert!(client.my_character().is_some());
        assert_eq!(client.door_open(level.doors[0]), Some(false));
    }
    assert!(session.client(alice).unwrap().character_of(bob).is_some());
}

#[test]
fn test_door_opens_over_lossy_links() {
    let (mut session, alice, bob) = room_session(0.25);
    let level = session.server().authority().level().clone();
    let (a, b) = (button_location(&session, 0), button_location(&session, 1));
    aim(&mut session, alice, ALICE_SPOT, a);
    aim(&mut session, bob, BOB_SPOT, b);

    session.client_mut(alice).unwrap().press_button(level.buttons[0]);
    session.run(1.0, DT);
    let door = level.doors[0];
    assert_eq!(session.client(bob).unwrap().button_pressed(level.buttons[0]), Some(true));
    assert_eq!(session.client(bob).unwrap().presser(level.buttons[0]), Some(alice));
    assert_eq!(session.client(alice).unwrap().door_open(door), Some(false));

    session.client_mut(bob).unwrap().press_button(level.buttons[1]);
    session.run(3.0, DT);

    assert!(session.dropped_packets() > 0);
    for who in [alice, bob] {
        let client = session.client(who).unwrap();
        assert_eq!(client.door_open(door), Some(true));
        let yaw = client.door_yaw(door).unwrap();
        assert!((yaw - 90.0).abs() < 1e-3, "door yaw {yaw}");
    }
    assert!(session.server_mut().drain_events().iter().any(|event| matches!(
        event,
        AuthorityEvent::Door { door: d, .. } if *d == door
    )));
}

#[test]
fn test_one_client_cannot_open_the_door_alone() {
    let (mut session, alice, _bob) = room_session(0.0);
    let level = session.server().authority().level().clone();
    let a = button_location(&session, 0);
    let b = button_location(&session, 1);

    aim(&mut session, alice, ALICE_SPOT, a);
    session.client_mut(alice).unwrap().press_button(level.buttons[0]);
    session.run(0.5, DT);
    aim(&mut session, alice, BOB_SPOT, b);
    session.client_mut(alice).unwrap().press_button(level.buttons[1]);
    session.run(0.5, DT);

    let client = session.client(alice).unwrap();
    assert_eq!(client.door_open(level.doors[0]), Some(false));
    // Walking to the other button released the first one.
    assert_eq!(client.button_pressed(level.buttons[0]), Some(false));
    assert_eq!(client.button_pressed(level.buttons[1]), Some(true));
}

#[test]
fn test_head_look_reaches_others_but_not_its_owner() {
    let (mut session, alice, bob) = room_session(0.0);
    let control = Rotator::new(30.0, 0.0, 0.0);
    let expected = character::head_look_from(control, Rotator::ZERO, 60.0);
    assert!(expected.yaw.abs() > 1.0);

    session.client_mut(alice).unwrap().set_control_rotation(control);
    session.run(0.5, DT);

    let seen_by_bob = session.client(bob).unwrap().head_look(alice).unwrap();
    assert!((seen_by_bob.yaw - expected.yaw).abs() < 1e-4);
    let own = session.client(alice).unwrap().head_look(alice).unwrap();
    assert!((own.yaw - expected.yaw).abs() < 1e-4);
    assert_eq!(
        session.client(bob).unwrap().head_look(bob),
        Some(Rotator::ZERO)
    );
}

#[test]
fn test_change_size_is_presented_then_confirmed() {
    let (mut session, alice, bob) = room_session(0.0);
    let client = session.client_mut(alice).unwrap();
    client.change_size(0.5);
    assert_eq!(client.presented_scale(alice), Some(0.5));
    session.run(0.3, DT);
    assert_eq!(session.client(bob).unwrap().character_scale(alice), Some(0.5));

    // Out of range requests are clamped before they leave the client.
    session.client_mut(alice).unwrap().change_size(5.0);
    session.run(0.3, DT);
    assert_eq!(session.client(bob).unwrap().character_scale(alice), Some(1.0));

    let client = session.client_mut(alice).unwrap();
    client.change_size(f32::NAN);
    assert_eq!(client.presented_scale(alice), Some(1.0));
    assert_eq!(client.unacknowledged(), 0);
}

#[test]
fn test_auto_released_press_is_forgotten() {
    let (mut session, alice, bob) = room_session(0.0);
    let button = session.server().authority().level().buttons[0];
    let a = button_location(&session, 0);

    aim(&mut session, alice, ALICE_SPOT, a);
    session.client_mut(alice).unwrap().press_button(button);
    session.run(0.3, DT);
    assert_eq!(session.client(alice).unwrap().presser(button), Some(alice));

    // Walking away makes the authority release the button.
    aim(&mut session, alice, Vec3::new(-2000.0, 0.0, 90.0), a);
    session.run(0.3, DT);
    let client = session.client(alice).unwrap();
    assert_eq!(client.button_pressed(button), Some(false));
    assert_eq!(client.pressed_button(), None);

    aim(&mut session, bob, ALICE_SPOT, a);
    session.client_mut(bob).unwrap().press_button(button);
    session.run(0.3, DT);
    assert_eq!(session.client(bob).unwrap().presser(button), Some(bob));

    session.client_mut(alice).unwrap().release_button();
    session.run(0.3, DT);
    let client = session.client(bob).unwrap();
    assert_eq!(client.button_pressed(button), Some(true));
    assert_eq!(client.presser(button), Some(bob));
}

#[test]
fn test_drag_follows_holder_and_releases() {
    let (mut session, alice, bob) = room_session(0.0);
    let crate_id = session.server().authority().level().crates[0];

    session.client_mut(bob).unwrap().grab(crate_id);
    session.run(2.0, DT);
    assert_eq!(session.client(alice).unwrap().drag_holder(crate_id), Some(bob));
    let location = session.client(alice).unwrap().location(crate_id).unwrap();
    let expected = Vec3::new(BOB_SPOT.x + 200.0, BOB_SPOT.y, 50.0);
    assert!(location.distance(expected) < 5.0, "crate at {location}");
    let presented = session.client(alice).unwrap().presented_location(crate_id).unwrap();
    assert!(presented.distance(expected) < 5.0, "crate drawn at {presented}");

    session.client_mut(bob).unwrap().release_grab();
    session.run(0.5, DT);
    assert_eq!(session.client(alice).unwrap().drag_holder(crate_id), None);
    assert_eq!(session.client(bob).unwrap().held_crate(), None);
}

#[test]
fn test_restart_replaces_every_entity() {
    let (mut session, alice, bob) = room_session(0.0);
    let old = session.server().authority().level().clone();

    session
        .client_mut(alice)
        .unwrap()
        .request(Request::RequestLevelRestart);
    session.run(1.0, DT);

    let new = session.server().authority().level().clone();
    assert_ne!(new.doors, old.doors);
    for who in [alice, bob] {
        let client = session.client_mut(who).unwrap();
        assert_eq!(client.doors(), new.doors);
        assert_eq!(client.door_open(old.doors[0]), None);
        assert!(client.local_entity(old.crates[0]).is_none());
        assert!(client.my_character().is_some());
    }
}

#[test]
fn test_lobby_travels_to_the_game_map() {
    let mut config = config(0.0);
    config.session.start_delay_secs = 1.0;
    let game_map = config.session.game_map.clone();
    let mut session = LocalSession::with_lobby(config, LevelLayout::interlock_room("unused"));

    let alice = session.connect();
    session.run(2.0, DT);
    assert!(session.server().lobby().is_some());
    assert!(session.client_mut(alice).unwrap().doors().is_empty());

    let _bob = session.connect();
    session.run(0.5, DT);
    assert!(session.server().lobby().is_some_and(|l| !l.has_started()));
    session.run(1.0, DT);

    assert!(session.server().lobby().is_none());
    let map = session.server().authority().map().to_owned();
    assert_eq!(map, format!("{game_map}?listen"));
    let client = session.client_mut(alice).unwrap();
    assert_eq!(client.doors().len(), 1);
    assert_eq!(client.buttons().len(), 2);
    assert!(client.my_character().is_some());
    assert!(
        session
            .server_mut()
            .drain_events()
            .contains(&AuthorityEvent::Travelled { map })
    );
}
