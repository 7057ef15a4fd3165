//! Quest configuration loaded from TOML
//!
//! ```toml
//! [settings]
//! passThreshold = 70
//! missionCap = 40
//!
//! [[levels]]
//! level = "Create"
//! baseXp = 50
//! supportCeiling = "Evaluate"
//!
//! [store]
//! path = "/var/lib/bloomquest/quest.db"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bloom::{BloomLevel, PolicyTable};
use super::models::QuestSettings;
use super::progression::MAX_RECENT_WINDOW;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Partial override of one row of the level policy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelOverride {
    pub level: BloomLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_xp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastery_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_ceiling: Option<BloomLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("bloomquest").join("quest.db")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestConfig {
    pub settings: QuestSettings,
    pub levels: Vec<LevelOverride>,
    pub store: StoreConfig,
}

impl QuestConfig {
    /// `~/.config/bloomquest/config.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bloomquest").join("config.toml"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config: {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        log::info!("Config: loaded {:?} (settings v{})", path, config.settings.version);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.settings;
        for (name, value) in [
            ("passThreshold", s.pass_threshold),
            ("blastsPercent", s.blasts_percent),
            ("reviewPercent", s.review_percent),
            ("masteryThreshold", s.mastery_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{} must be between 0 and 100, got {}", name, value)));
            }
        }
        if s.mission_cap == 0 {
            return Err(ConfigError::Invalid("missionCap must be at least 1".to_string()));
        }
        if s.recent_window == 0 || s.recent_window > MAX_RECENT_WINDOW {
            return Err(ConfigError::Invalid(format!(
                "recentWindow must be between 1 and {}",
                MAX_RECENT_WINDOW
            )));
        }
        for entry in &self.levels {
            if entry.base_xp.is_some_and(|xp| xp < 0.0) {
                return Err(ConfigError::Invalid(format!("baseXp for {} is negative", entry.level)));
            }
            if entry.mastery_multiplier.is_some_and(|m| m < 0.0) {
                return Err(ConfigError::Invalid(format!("masteryMultiplier for {} is negative", entry.level)));
            }
        }
        Ok(())
    }

    /// The default policy table with this config's overrides applied
    pub fn policy_table(&self) -> PolicyTable {
        let mut table = PolicyTable::default();
        for entry in &self.levels {
            let mut policy = *table.get(entry.level);
            if let Some(xp) = entry.base_xp {
                policy.base_xp = xp;
            }
            if let Some(multiplier) = entry.mastery_multiplier {
                policy.mastery_multiplier = multiplier;
            }
            if let Some(ceiling) = entry.support_ceiling {
                policy.support_ceiling = ceiling;
            }
            table.set(policy);
        }
        table
    }
}
