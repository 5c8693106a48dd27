//! Unit tests for field replication.

use super::*;

#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct Open(bool);

#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct Look(f32);

/// Counts notify invocations on the observer.
#[derive(Component, Debug, Default)]
struct OpenNotified(u32);

fn on_open(world: &mut World, entity: Entity) {
    if let Some(mut count) = world.get_mut::<OpenNotified>(entity) {
        count.0 += 1;
    } else {
        world.entity_mut(entity).insert(OpenNotified(1));
    }
}

fn test_rep_set() -> ReplicationSet {
    let mut set = ReplicationSet::new();
    set.register::<Open>(FieldSpec::new("Open").with_notify(on_open))
        .register::<Look>(FieldSpec::new("Look").skip_owner());
    set
}

const ALICE: ParticipantId = ParticipantId(1);
const BOB: ParticipantId = ParticipantId(2);

#[test]
fn test_spawn_reaches_every_observer() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);
    server.add_client(BOB);

    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    server_world.spawn((net_id, Open(false)));

    let msgs = server.replicate(&mut server_world, &rep_set, 1);
    assert_eq!(msgs[&ALICE].spawns.len(), 1);
    assert_eq!(msgs[&BOB].spawns.len(), 1);
    assert_eq!(msgs[&ALICE].spawns[0].network_id, net_id);
}

#[test]
fn test_unchanged_field_is_not_resent() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);

    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    let entity = server_world.spawn((net_id, Open(false))).id();

    let _ = server.replicate(&mut server_world, &rep_set, 1);
    let quiet = server.replicate(&mut server_world, &rep_set, 2);
    assert!(quiet[&ALICE].is_empty());

    server_world.get_mut::<Open>(entity).unwrap().0 = true;
    let msgs = server.replicate(&mut server_world, &rep_set, 3);
    assert_eq!(msgs[&ALICE].updates.len(), 1);
    assert_eq!(msgs[&ALICE].updates[0].tick, 3);
    assert_eq!(msgs[&ALICE].updates[0].changed_fields[0].0, "Open");
}

#[test]
fn test_notify_runs_once_per_change() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);

    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    let entity = server_world.spawn((net_id, Open(false))).id();

    let mut client_world = World::new();
    let mut client = ReplicationClientSystem::new();

    let msgs = server.replicate(&mut server_world, &rep_set, 1);
    client.apply(&mut client_world, &rep_set, &msgs[&ALICE]);
    let local = client.local_entity(net_id).unwrap();
    assert_eq!(client_world.get::<OpenNotified>(local).unwrap().0, 1);

    // No change, no hook.
    let msgs = server.replicate(&mut server_world, &rep_set, 2);
    client.apply(&mut client_world, &rep_set, &msgs[&ALICE]);
    assert_eq!(client_world.get::<OpenNotified>(local).unwrap().0, 1);

    server_world.get_mut::<Open>(entity).unwrap().0 = true;
    let msgs = server.replicate(&mut server_world, &rep_set, 3);
    client.apply(&mut client_world, &rep_set, &msgs[&ALICE]);
    assert_eq!(client_world.get::<OpenNotified>(local).unwrap().0, 2);
    assert_eq!(*client_world.get::<Open>(local).unwrap(), Open(true));

    // A replayed batch carries no new value and must not re-notify.
    client.apply(&mut client_world, &rep_set, &msgs[&ALICE]);
    assert_eq!(client_world.get::<OpenNotified>(local).unwrap().0, 2);
}

#[test]
fn test_skip_owner_field_never_reaches_owner() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);
    server.add_client(BOB);

    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    let entity = server_world
        .spawn((net_id, NetOwner(ALICE), Open(false), Look(10.0)))
        .id();

    let msgs = server.replicate(&mut server_world, &rep_set, 1);
    let alice_tags: Vec<&str> = msgs[&ALICE].spawns[0]
        .fields
        .iter()
        .map(|(t, _)| t.as_str())
        .collect();
    let bob_tags: Vec<&str> = msgs[&BOB].spawns[0]
        .fields
        .iter()
        .map(|(t, _)| t.as_str())
        .collect();
    assert_eq!(alice_tags, vec!["Open"]);
    assert_eq!(bob_tags, vec!["Open", "Look"]);

    server_world.get_mut::<Look>(entity).unwrap().0 = 25.0;
    let msgs = server.replicate(&mut server_world, &rep_set, 2);
    assert!(msgs[&ALICE].is_empty());
    assert_eq!(msgs[&BOB].updates.len(), 1);
}

#[test]
fn test_despawn_replicates() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);

    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    let entity = server_world.spawn((net_id, Open(false))).id();

    let mut client_world = World::new();
    let mut client = ReplicationClientSystem::new();
    let msgs = server.replicate(&mut server_world, &rep_set, 1);
    client.apply(&mut client_world, &rep_set, &msgs[&ALICE]);
    let local = client.local_entity(net_id).unwrap();

    server_world.despawn(entity);
    let msgs = server.replicate(&mut server_world, &rep_set, 2);
    assert_eq!(msgs[&ALICE].despawns, vec![DespawnEntity { network_id: net_id }]);
    client.apply(&mut client_world, &rep_set, &msgs[&ALICE]);
    assert!(client.local_entity(net_id).is_none());
    assert!(client_world.get_entity(local).is_err());
}

#[test]
fn test_late_joiner_gets_full_snapshot() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);

    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    let entity = server_world.spawn((net_id, Open(false))).id();
    let _ = server.replicate(&mut server_world, &rep_set, 1);
    server_world.get_mut::<Open>(entity).unwrap().0 = true;
    let _ = server.replicate(&mut server_world, &rep_set, 2);

    server.add_client(BOB);
    let msgs = server.replicate(&mut server_world, &rep_set, 3);
    assert!(msgs[&ALICE].is_empty());
    let mut client_world = World::new();
    let mut client = ReplicationClientSystem::new();
    client.apply(&mut client_world, &rep_set, &msgs[&BOB]);
    let local = client.local_entity(net_id).unwrap();
    assert_eq!(*client_world.get::<Open>(local).unwrap(), Open(true));
}

#[test]
fn test_duplicate_registration_is_ignored() {
    let mut set = test_rep_set();
    set.register::<Open>(FieldSpec::new("Open"));
    assert_eq!(set.len(), 2);
    assert!(set.field("Open").unwrap().notify.is_some());
}

#[test]
fn test_messages_survive_postcard() {
    let rep_set = test_rep_set();
    let mut server = ReplicationServerSystem::new();
    server.add_client(ALICE);
    let mut server_world = World::new();
    let net_id = server.allocate_network_id();
    server_world.spawn((net_id, Open(true)));
    let msgs = server.replicate(&mut server_world, &rep_set, 1);

    let bytes = postcard::to_allocvec(&msgs[&ALICE]).unwrap();
    let decoded: ReplicationMessages = postcard::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, msgs[&ALICE]);
}
