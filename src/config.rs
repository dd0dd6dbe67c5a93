//! Configuration management for scrobble-relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::worker::BackoffPolicy;

/// Default scrobbling service endpoint
pub const DEFAULT_ENDPOINT_URL: &str = "http://api.gravifon.org/v1";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Scrobbling service account and durability settings
    pub scrobbler: ScrobblerConfig,

    /// Submission worker tuning
    pub submission: SubmissionConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Data directory (default: ~/.local/share/scrobble-relay)
    pub data_dir: Option<PathBuf>,
}

/// Scrobbling service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrobblerConfig {
    /// Whether scrobbling is enabled at all
    pub enabled: bool,

    /// Service API base URL
    pub endpoint_url: String,

    /// Account username; must be ASCII-only
    pub username: String,

    /// Account password; must be ASCII-only
    pub password: String,

    /// Flush every scrobble to the durable queue file before the enqueue
    /// call returns
    pub safe_scrobbling: bool,

    /// Minimum played share of the track duration for a candidate to be
    /// scrobbled, in percent (0-100). Out-of-range values count as 0.
    pub threshold_percent: f64,

    /// Queue file path (default: `<data_dir>/pending-scrobbles.jsonl`)
    pub queue_path: Option<PathBuf>,

    /// Write enqueues durably while submission is suspended, even when
    /// safe scrobbling is off, so recorded-but-unsubmittable scrobbles
    /// survive a restart
    pub persist_when_suspended: bool,
}

/// Submission worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// First retry delay after a transient failure, in seconds
    pub backoff_floor_secs: u64,

    /// Retry delay ceiling, in seconds
    pub backoff_ceiling_secs: u64,
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: None,
        }
    }
}

impl Default for ScrobblerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            username: String::new(),
            password: String::new(),
            safe_scrobbling: false,
            threshold_percent: 0.0,
            queue_path: None,
            persist_when_suspended: true,
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 20,
            backoff_floor_secs: 5,
            backoff_ceiling_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine config directory"))?;
        Ok(config_dir.join(crate::APP_NAME).join("config.toml"))
    }

    /// Get the data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.general.data_dir {
            Ok(dir.clone())
        } else {
            let data_dir = dirs::data_local_dir()
                .ok_or_else(|| Error::config("Could not determine data directory"))?;
            Ok(data_dir.join(crate::APP_NAME))
        }
    }

    /// Get the durable queue file path
    pub fn queue_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.scrobbler.queue_path {
            return Ok(path.clone());
        }
        Ok(self.data_dir()?.join("pending-scrobbles.jsonl"))
    }

    /// Validate configuration values.
    ///
    /// Call this after loading to ensure all values are within acceptable
    /// ranges. The scrobble threshold is deliberately not validated here:
    /// out-of-range values clamp to 0 instead of failing.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "log_level must be one of {:?}, got '{}'",
                valid_levels, self.general.log_level
            )));
        }

        if self.submission.request_timeout_secs == 0 {
            return Err(Error::config("request_timeout_secs must be positive"));
        }

        if self.submission.backoff_floor_secs > self.submission.backoff_ceiling_secs {
            return Err(Error::config(format!(
                "backoff_floor_secs ({}) exceeds backoff_ceiling_secs ({})",
                self.submission.backoff_floor_secs, self.submission.backoff_ceiling_secs
            )));
        }

        Ok(())
    }
}

impl ScrobblerConfig {
    /// Scrobble threshold as a fraction in `[0, 1]`. Values outside the
    /// 0-100 percent range clamp to 0.
    #[must_use]
    pub fn threshold_fraction(&self) -> f64 {
        if (0.0..=100.0).contains(&self.threshold_percent) {
            self.threshold_percent / 100.0
        } else {
            0.0
        }
    }
}

impl SubmissionConfig {
    /// Per-request timeout
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff policy for the submission worker
    #[must_use]
    pub const fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            floor: Duration::from_secs(self.backoff_floor_secs),
            ceiling: Duration::from_secs(self.backoff_ceiling_secs),
        }
    }
}
