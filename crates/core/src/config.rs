//! Settings loaded from `roomlink.toml`
//!
//! Every key is optional; missing keys fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "roomlink.toml";

/// Default transport port
pub const DEFAULT_PORT: u16 = 7777;

/// Address the `localhost` alias resolves to
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Port the transport targets before any room code sets one
    pub default_port: u16,
    /// Address used for the `localhost` alias
    pub loopback_address: String,
    /// Give up on a connection attempt after this many seconds.
    /// Unset means wait for the transport indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Name announced to the lobby host when joining
    pub player_name: String,
    /// Name of the lobby when hosting
    pub lobby_name: String,
    /// Maximum players a hosted lobby accepts
    pub max_players: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            loopback_address: LOOPBACK_ADDRESS.to_string(),
            connect_timeout_secs: None,
            player_name: "player".to_string(),
            lobby_name: "Lobby".to_string(),
            max_players: 8,
        }
    }
}

impl Settings {
    /// Platform config location, e.g. `~/.config/roomlink/roomlink.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "onyx", "roomlink")
            .ok_or_else(|| Error::Config("Could not determine config directory".into()))?;

        Ok(dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Load settings from a file, failing if it is missing or invalid
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings = Self::parse(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Load settings, using defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.loopback_address.trim().is_empty() {
            return Err(Error::Config("loopback_address must not be empty".into()));
        }
        if self.max_players == 0 {
            return Err(Error::Config("max_players must be at least 1".into()));
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(Error::Config(
                "connect_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }
}
