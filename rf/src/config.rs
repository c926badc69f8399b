//! ReelForge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::AssetKind;

/// Main ReelForge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collaborator endpoint configuration
    pub services: ServicesConfig,

    /// Plan/QC loop settings
    pub director: DirectorConfig,

    /// Generation phase settings
    pub generation: GenerationConfig,

    /// Shared retry policy
    pub retry: RetryConfig,

    /// Storage locations
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.services.base_url.trim().is_empty() {
            return Err(eyre::eyre!("services.base-url must not be empty"));
        }
        if self.director.pass_threshold > 3 {
            return Err(eyre::eyre!(
                "director.pass-threshold is {} but only 3 creative dimensions exist",
                self.director.pass_threshold
            ));
        }
        if self.retry.max_attempts == 0 || self.director.max_attempts == 0 {
            return Err(eyre::eyre!("attempt counts must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .reelforge.yml
        let local_config = PathBuf::from(".reelforge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/reelforge/reelforge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("reelforge").join("reelforge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Collaborator endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Base URL of the collaborator HTTP API
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// HTTP client timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8700".to_string(),
            api_key_env: "REELFORGE_API_KEY".to_string(),
            timeout_ms: 180_000,
        }
    }
}

/// Plan/QC loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    /// Planner attempts before giving up on the creative gate
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Creative dimensions that must pass
    #[serde(rename = "pass-threshold")]
    pub pass_threshold: u32,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pass_threshold: 2,
        }
    }
}

/// Generation phase settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Minimum interval between external generation calls
    #[serde(rename = "min-interval-ms")]
    pub min_interval_ms: u64,

    /// Timeout for a single collaborator call
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,

    /// Asset kinds regenerated when vision QC finds them incoherent
    #[serde(rename = "auto-regenerate-kinds")]
    pub auto_regenerate_kinds: Vec<AssetKind>,

    /// Generation attempts per asset under vision QC
    #[serde(rename = "vision-qc-attempts")]
    pub vision_qc_attempts: u32,

    /// Export format handed to the exporter
    #[serde(rename = "export-format")]
    pub export_format: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1500,
            call_timeout_ms: 120_000,
            auto_regenerate_kinds: vec![AssetKind::CloseUp],
            vision_qc_attempts: 2,
            export_format: "mp4".to_string(),
        }
    }
}

impl GenerationConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Shared retry policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for session snapshots
    #[serde(rename = "sessions-dir")]
    pub sessions_dir: PathBuf,

    /// Root of per-moment working directories
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/reelforge on Linux)
        let root = dirs::data_dir()
            .map(|d| d.join("reelforge"))
            .unwrap_or_else(|| PathBuf::from(".reelforge"));

        Self {
            sessions_dir: root.join("sessions"),
            output_dir: root.join("output"),
        }
    }
}

impl StorageConfig {
    /// Directory for per-session event logs
    pub fn events_dir(&self) -> PathBuf {
        self.sessions_dir.join("events")
    }
}
