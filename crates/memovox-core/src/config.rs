use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MemovoxError, Result};
use crate::format;
use crate::streak::LongestStreakPolicy;

/// Top-level configuration for memovox.
///
/// Loaded from `~/.memovox/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemovoxConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub streak: StreakConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl MemovoxConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MemovoxConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.database_file.trim().is_empty() {
            return Err(MemovoxError::Config(
                "storage.database_file must not be empty".to_string(),
            ));
        }
        format::validate(&self.audio.default_format).map_err(|e| {
            MemovoxError::Config(format!("audio.default_format: {}", e))
        })?;
        for tag in &self.audio.preferred_formats {
            format::validate(tag)
                .map_err(|e| MemovoxError::Config(format!("audio.preferred_formats: {}", e)))?;
        }
        if let Some(minutes) = self.streak.utc_offset_minutes {
            if !(-14 * 60..=14 * 60).contains(&minutes) {
                return Err(MemovoxError::Config(format!(
                    "streak.utc_offset_minutes out of range: {}",
                    minutes
                )));
            }
        }
        Ok(())
    }

    /// Absolute path of the database file under the data directory.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.database_file)
    }

    /// Absolute path of the legacy store, if one is configured.
    pub fn legacy_database_path(&self) -> Option<PathBuf> {
        self.storage
            .legacy_database
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var_os(var).map(PathBuf::from)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the database file.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.memovox/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file name inside `general.data_dir`.
    pub database_file: String,
    /// Path to a legacy store to import once on startup.
    pub legacy_database: Option<String>,
    /// Run the payload/format consistency sweep after startup.
    pub consistency_sweep: bool,
    /// How long a write waits on a locked database file.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "memovox.db".to_string(),
            legacy_database: None,
            consistency_sweep: true,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Streak derivation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakConfig {
    pub longest_policy: LongestStreakPolicy,
    /// Fixed offset for calendar days, in minutes east of UTC.
    /// System local time when unset.
    pub utc_offset_minutes: Option<i32>,
}

/// Audio format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Tag used when a capture supplies neither candidates nor detectable bytes.
    pub default_format: String,
    /// Candidate recording formats, most preferred first.
    pub preferred_formats: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            default_format: format::DEFAULT_FORMAT.to_string(),
            preferred_formats: format::PREFERRED_FORMATS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
