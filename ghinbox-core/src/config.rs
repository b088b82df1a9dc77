use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound for `sync.lookback_hours` (90 days).
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 90;

/// Top-level ghinbox configuration, matching `.ghinbox/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboxConfig {
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub views: ViewsSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl InboxConfig {
    /// Load a config file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML (used by `ghinbox init`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.notifications_interval_secs == 0 || self.sync.resource_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync intervals must be greater than zero".into(),
            ));
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.sync.lookback_hours) {
            return Err(ConfigError::Invalid(format!(
                "sync.lookback_hours must be in 1..={MAX_LOOKBACK_HOURS}, got {}",
                self.sync.lookback_hours
            )));
        }
        if self.github.per_page == 0 || self.github.per_page > 100 {
            return Err(ConfigError::Invalid(format!(
                "github.per_page must be in 1..=100, got {}",
                self.github.per_page
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    /// Environment variable holding the API token.
    pub token_env: String,
    pub api_base: String,
    pub max_retries: u32,
    pub per_page: u32,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            token_env: "GITHUB_TOKEN".to_string(),
            api_base: "https://api.github.com".to_string(),
            max_retries: 5,
            per_page: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    pub notifications_interval_secs: u64,
    /// Refresh interval for issues, comments, and users.
    pub resource_interval_secs: u64,
    /// How far back the first notifications poll after startup looks.
    pub lookback_hours: i64,
    /// Save the notifications watermark so it survives restarts.
    pub persist_cursor: bool,
    /// How long a poll loop keeps running with no subscribers before eviction.
    pub idle_ttl_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            notifications_interval_secs: 30,
            resource_interval_secs: 60 * 60,
            lookback_hours: 24,
            persist_cursor: false,
            idle_ttl_secs: 300,
        }
    }
}

impl SyncSection {
    pub fn notifications_interval(&self) -> Duration {
        Duration::from_secs(self.notifications_interval_secs)
    }

    pub fn resource_interval(&self) -> Duration {
        Duration::from_secs(self.resource_interval_secs)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours.clamp(1, MAX_LOOKBACK_HOURS))
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewsSection {
    /// Quiescence window for single-entity reference views.
    pub reference_debounce_ms: u64,
    /// Quiescence window for full-collection views.
    pub collection_debounce_ms: u64,
}

impl Default for ViewsSection {
    fn default() -> Self {
        Self {
            reference_debounce_ms: 500,
            collection_debounce_ms: 1500,
        }
    }
}

impl ViewsSection {
    pub fn reference_debounce(&self) -> Duration {
        Duration::from_millis(self.reference_debounce_ms)
    }

    pub fn collection_debounce(&self) -> Duration {
        Duration::from_millis(self.collection_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Database path, relative to the config directory unless absolute.
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ghinbox.db"),
        }
    }
}

impl StorageSection {
    pub fn resolve(&self, config_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            config_dir.join(&self.path)
        }
    }
}
