//! Headless interlock server.
//!
//! Boots a session in the lobby map, connects in-process participants until
//! the lobby starts the game, then plays the interlock room: two players
//! stand on the buttons to open the door while any third player drags the
//! crate. Everything runs over loopback links shaped by `[network]`.
//!
//! Run with: `cargo run -p interlock-server -- --players 2 --start-delay 1`

use std::process::ExitCode;

use clap::Parser;
use glam::Vec3;
use interlock_config::{CliArgs, Config, default_config_dir};
use interlock_game::character::EYE_HEIGHT;
use interlock_game::{LevelLayout, LocalSession, Rotator};
use interlock_net::ParticipantId;
use tracing::{error, info, warn};

const FRAME_DT: f32 = 1.0 / 60.0;

fn load_config(args: &CliArgs) -> Config {
    let dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = match Config::load_or_create(&dir) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config at {} unusable ({err}), using defaults", dir.display());
            Config::default()
        }
    };
    config.apply_cli_overrides(args);
    config
}

/// Poses participant `index` at its spawn point looking at `target`.
fn stand_and_face(
    session: &mut LocalSession,
    layout: &LevelLayout,
    who: ParticipantId,
    index: usize,
    target: Vec3,
) {
    let spot = layout.spawn_point(index);
    let control = Rotator::from_direction(target - (spot.location + Vec3::Z * EYE_HEIGHT));
    session
        .server_mut()
        .authority_mut()
        .set_character_pose(who, spot, control);
    if let Some(client) = session.client_mut(who) {
        client.set_control_rotation(control);
    }
}

fn play(config: Config, duration: f32) -> Result<(), String> {
    let players = config.session.player_threshold.max(2);
    let start_wait = config.session.start_delay_secs as f32 + 1.0;
    let layout = LevelLayout::interlock_room(config.session.game_map.clone());
    let mut session = LocalSession::with_lobby(config, layout.clone());

    let participants: Vec<ParticipantId> = (0..players).map(|_| session.connect()).collect();
    info!(players, "participants connected");

    let mut waited = 0.0;
    while session.server().lobby().is_some() {
        if waited > start_wait {
            return Err("lobby never started the session".to_string());
        }
        session.step(FRAME_DT);
        waited += FRAME_DT;
    }
    session.run(0.5, FRAME_DT);
    info!(map = %session.server().authority().map(), "game map loaded");

    let level = session.server().authority().level().clone();
    let (Some(&door), &[button_a, button_b, ..]) = (level.doors.first(), level.buttons.as_slice())
    else {
        return Err("game map has no door with two buttons".to_string());
    };

    for (index, (&who, button)) in participants.iter().zip([button_a, button_b]).enumerate() {
        let Some(target) = session.client(who).and_then(|c| c.location(button)) else {
            return Err(format!("{who} cannot see button {}", button.0));
        };
        stand_and_face(&mut session, &layout, who, index, target);
        if let Some(client) = session.client_mut(who) {
            client.press_button(button);
        }
    }

    if let (Some(&dragger), Some(&crate_id)) = (participants.get(2), level.crates.first())
        && let Some(client) = session.client_mut(dragger)
    {
        client.grab(crate_id);
    }

    session.run(duration, FRAME_DT);

    for event in session.server_mut().drain_events() {
        info!(?event, "session event");
    }
    for &who in &participants {
        let Some(client) = session.client(who) else {
            continue;
        };
        info!(
            participant = %who,
            door_open = ?client.door_open(door),
            door_yaw = ?client.door_yaw(door),
            "client view"
        );
    }
    if session.dropped_packets() > 0 {
        warn!(dropped = session.dropped_packets(), "link dropped packets");
    }

    let opened = participants
        .iter()
        .all(|&who| session.client(who).and_then(|c| c.door_open(door)) == Some(true));
    if opened {
        Ok(())
    } else {
        Err("door did not open on every client".to_string())
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = load_config(&args);

    let log_dir = args.config.clone().unwrap_or_else(default_config_dir).join("logs");
    if let Err(err) =
        interlock_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config))
    {
        eprintln!("logging unavailable: {err}");
    }

    if let Err(err) = config.validate() {
        error!(%err, "invalid configuration");
        return ExitCode::FAILURE;
    }

    info!(
        players = config.session.player_threshold,
        tick_rate = config.session.tick_rate,
        link_loss = config.network.link_loss,
        "interlock server starting"
    );

    match play(config, args.duration as f32) {
        Ok(()) => {
            info!("door opened for every participant");
            ExitCode::SUCCESS
        }
        Err(reason) => {
            error!(%reason, "session failed");
            ExitCode::FAILURE
        }
    }
}
