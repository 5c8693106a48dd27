//! Configuration for the interlock session server.
//!
//! Settings persist to disk as RON and accept CLI overrides via clap. Values
//! are read once at startup; entities copy what they need when spawned.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    ButtonConfig, CharacterConfig, ClosePolicy, Config, CrateConfig, DebugConfig, DoorConfig,
    NetworkConfig, SessionConfig, default_config_dir,
};
pub use error::ConfigError;
