//! Command-line argument parsing for the interlock server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Interlock server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "interlock", about = "Headless interlock session server")]
pub struct CliArgs {
    /// Participants needed before the lobby starts the session.
    #[arg(long)]
    pub players: Option<u32>,

    /// Lobby start delay in seconds.
    #[arg(long)]
    pub start_delay: Option<f64>,

    /// Authority tick rate in Hz.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Packet loss probability on the in-process link.
    #[arg(long)]
    pub link_loss: Option<f64>,

    /// Seconds of session to simulate after the level loads.
    #[arg(long, default_value_t = 5.0)]
    pub duration: f64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(players) = args.players {
            self.session.player_threshold = players;
        }
        if let Some(delay) = args.start_delay {
            self.session.start_delay_secs = delay;
        }
        if let Some(rate) = args.tick_rate {
            self.session.tick_rate = rate;
        }
        if let Some(loss) = args.link_loss {
            self.network.link_loss = loss;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
