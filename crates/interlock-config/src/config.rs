//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration for an interlock session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Lobby and level lifecycle.
    pub session: SessionConfig,
    /// Interlock door defaults.
    pub door: DoorConfig,
    /// Pressure button defaults.
    pub button: ButtonConfig,
    /// Movable crate defaults.
    pub crate_drag: CrateConfig,
    /// Player character limits.
    pub character: CharacterConfig,
    /// Channel and transport settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Lobby and level lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Participants needed in the lobby before the start timer is armed.
    pub player_threshold: u32,
    /// Delay between reaching the threshold and starting the session.
    pub start_delay_secs: f64,
    /// Delay between a restart request and the level travel.
    pub restart_delay_secs: f64,
    /// Authority simulation rate in Hz.
    pub tick_rate: u32,
    /// Map the lobby runs on.
    pub lobby_map: String,
    /// Map the session travels to once started.
    pub game_map: String,
}

/// Whether a door closes on its own once its buttons are released.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Only an explicit close request closes the door.
    #[default]
    Explicit,
    /// The authority closes the door when the two-button condition stops holding.
    OnConditionLost,
}

/// Interlock door settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DoorConfig {
    /// Seconds for a full swing.
    pub open_duration_secs: f32,
    /// Hinge yaw offset in degrees when opening forward.
    pub forward_offset_deg: f32,
    /// Hinge yaw offset in degrees when opening backward.
    pub backward_offset_deg: f32,
    /// Closing behaviour once open.
    pub close_policy: ClosePolicy,
}

/// Pressure button settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ButtonConfig {
    /// Seconds for the cap to travel fully in or out.
    pub press_duration_secs: f32,
    /// Distance the cap sinks when pressed.
    pub press_depth: f32,
    /// Maximum camera-to-button distance for an interaction.
    pub max_interact_distance: f32,
    /// Maximum angle in degrees between view direction and the button.
    pub max_interact_angle_deg: f32,
}

/// Movable crate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrateConfig {
    /// Maximum planar distance between requester and crate to begin a drag.
    pub max_drag_distance: f32,
    /// Exponential interpolation speed toward the drag target.
    pub drag_interp_speed: f32,
    /// Delay before gravity and simulation come back after a drag.
    pub settle_delay_secs: f64,
    /// Linear damping while dragged.
    pub drag_linear_damping: f32,
    /// Distance in front of the holder's view the crate is pulled toward.
    pub hold_distance: f32,
}

/// Player character settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CharacterConfig {
    /// Smallest accepted character scale.
    pub min_scale: f32,
    /// Largest accepted character scale.
    pub max_scale: f32,
    /// Head-look yaw clamp in degrees.
    pub head_look_limit_deg: f32,
}

/// Channel and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seconds before an unacknowledged reliable message is resent.
    pub resend_interval_secs: f64,
    /// Packet loss probability applied by the in-process link.
    pub link_loss: f64,
    /// Seed for the in-process link conditioner.
    pub link_seed: u64,
}

/// Debug/development settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_threshold: 2,
            start_delay_secs: 10.0,
            restart_delay_secs: 0.1,
            tick_rate: 60,
            lobby_map: "/Game/Maps/Lobby".to_string(),
            game_map: "/Game/ThirdPerson/Maps/ThirdPersonMap".to_string(),
        }
    }
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            open_duration_secs: 1.0,
            forward_offset_deg: 90.0,
            backward_offset_deg: -90.0,
            close_policy: ClosePolicy::Explicit,
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            press_duration_secs: 0.2,
            press_depth: 30.0,
            max_interact_distance: 400.0,
            max_interact_angle_deg: 8.0,
        }
    }
}

impl Default for CrateConfig {
    fn default() -> Self {
        Self {
            max_drag_distance: 400.0,
            drag_interp_speed: 8.0,
            settle_delay_secs: 0.25,
            drag_linear_damping: 6.0,
            hold_distance: 200.0,
        }
    }
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.2,
            max_scale: 1.0,
            head_look_limit_deg: 60.0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            resend_interval_secs: 0.1,
            link_loss: 0.0,
            link_seed: 0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Rejects values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.character;
        if !(c.min_scale > 0.0 && c.min_scale <= c.max_scale) {
            return Err(ConfigError::Invalid {
                field: "character.min_scale",
                reason: format!(
                    "need 0 < min_scale <= max_scale, got [{}, {}]",
                    c.min_scale, c.max_scale
                ),
            });
        }
        if self.session.player_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "session.player_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.door.open_duration_secs <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "door.open_duration_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.button.press_duration_secs <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "button.press_duration_secs",
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.network.link_loss) {
            return Err(ConfigError::Invalid {
                field: "network.link_loss",
                reason: format!("must be within [0, 1], got {}", self.network.link_loss),
            });
        }
        Ok(())
    }
}

/// Platform config directory for interlock, e.g. `~/.config/interlock`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("interlock")
}
