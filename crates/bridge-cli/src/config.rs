//! CLI configuration file
//!
//! ```toml
//! log_level = "info"
//!
//! [bridge]
//! server_url = "ws://localhost:8765"
//! reconnect_delay_ms = 5000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rvoip_bridge_client::BridgeConfig;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "rvoip-phone";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default tracing filter, overridden by `RUST_LOG` and `--log-level`
    pub log_level: String,
    /// Path of the saved-credentials file; next to the config file if unset
    pub settings_file: Option<PathBuf>,
    pub bridge: BridgeConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            settings_file: None,
            bridge: BridgeConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.bridge.validate()?;
        Ok(config)
    }

    /// Where saved credentials live for a config loaded from `config_path`
    pub fn settings_path(&self, config_path: &Path) -> PathBuf {
        match &self.settings_file {
            Some(path) => path.clone(),
            None => config_path
                .parent()
                .map(|dir| dir.join("settings.json"))
                .unwrap_or_else(|| PathBuf::from("settings.json")),
        }
    }
}

/// `<config_dir>/rvoip-phone/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}
