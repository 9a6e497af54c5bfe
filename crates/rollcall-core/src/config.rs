//! Application configuration management.
//!
//! Configuration is stored at `~/.config/rollcall/config.json`. Any value
//! can be overridden from the environment (`ROLLCALL_SCHOOL_ID`,
//! `ROLLCALL_DATA_FILE`, `ROLLCALL_LOG_DIR`), which is how a `.env` file
//! feeds into it.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_UPDATE_BUFFER;

/// Application name used for config/data directory paths
const APP_NAME: &str = "rollcall";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Data file name used when none is configured
const DATA_FILE: &str = "data.json";

const ENV_SCHOOL_ID: &str = "ROLLCALL_SCHOOL_ID";
const ENV_DATA_FILE: &str = "ROLLCALL_DATA_FILE";
const ENV_LOG_DIR: &str = "ROLLCALL_LOG_DIR";

fn default_update_buffer() -> usize {
    DEFAULT_UPDATE_BUFFER
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub school_id: Option<String>,
    pub data_file: Option<PathBuf>,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            school_id: None,
            data_file: None,
            log_dir: None,
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }
}

impl Config {
    /// Load the config file (defaults if missing), then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay values from a key lookup; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(school_id) = get(ENV_SCHOOL_ID) {
            self.school_id = Some(school_id.trim().to_string());
        }
        if let Some(data_file) = get(ENV_DATA_FILE) {
            self.data_file = Some(PathBuf::from(data_file));
        }
        if let Some(log_dir) = get(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(log_dir));
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// The configured data file, or `rollcall/data.json` under the
    /// platform data directory.
    pub fn data_file(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.data_file {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(DATA_FILE))
    }
}
