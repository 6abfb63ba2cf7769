//! Runtime configuration
//!
//! Every section has working defaults, so a config file only needs the
//! values it changes:
//!
//! ```json
//! { "simulator": { "base_bpm": 64.0 }, "pacer": { "tick_interval_ms": 100 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::haptics::HapticsConfig;
use crate::pacer::PacerConfig;
use crate::session::SessionConfig;
use crate::source::{SimulatorConfig, TapConfig};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV_VAR: &str = "PULSESYNC_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub simulator: SimulatorConfig,
    pub tap: TapConfig,
    pub haptics: HapticsConfig,
    pub session: SessionConfig,
    pub pacer: PacerConfig,
}

impl PulseConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the file named by `PULSESYNC_CONFIG`, or the defaults when the
    /// variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(path),
            None => {
                log::debug!("{} not set, using default config", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
