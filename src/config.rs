//! Configuration file at ~/.locus/config.json.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Environment: `GOOGLE_MAPS_API_KEY` and `LOCUS_LOG` override the file.

use crate::location::geocoding::DEFAULT_GEOCODE_TIMEOUT;
use crate::location::ip::DEFAULT_IP_TIMEOUT;
use crate::location::position::PositionRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_GOOGLE_KEY: &str = "GOOGLE_MAPS_API_KEY";
pub const ENV_LOG: &str = "LOCUS_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Enables the Google Geocoding provider.
    pub google_api_key: Option<String>,
    /// Sent to providers that require identification (Nominatim).
    pub user_agent: String,
    pub geocoding: ChainConfig,
    pub ip: ChainConfig,
    pub position: PositionConfig,
    pub logging: LoggingConfig,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            user_agent: format!("Locus/{} (delivery-location-resolver)", env!("CARGO_PKG_VERSION")),
            geocoding: ChainConfig {
                timeout_ms: DEFAULT_GEOCODE_TIMEOUT.as_millis() as u64,
            },
            ip: ChainConfig {
                timeout_ms: DEFAULT_IP_TIMEOUT.as_millis() as u64,
            },
            position: PositionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Per-provider deadline of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub timeout_ms: u64,
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub high: TierConfig,
    pub low: TierConfig,
    /// Return a permission denial from the first attempt without retrying.
    pub skip_retry_on_denied: bool,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            high: TierConfig::from(PositionRequest::HIGH_ACCURACY),
            low: TierConfig::from(PositionRequest::LOW_ACCURACY),
            skip_retry_on_denied: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub timeout_ms: u64,
    pub max_cache_age_ms: u64,
}

impl TierConfig {
    pub fn request(&self, high_accuracy: bool) -> PositionRequest {
        PositionRequest {
            high_accuracy,
            timeout: Duration::from_millis(self.timeout_ms),
            max_cache_age: Duration::from_millis(self.max_cache_age_ms),
        }
    }
}

impl From<PositionRequest> for TierConfig {
    fn from(r: PositionRequest) -> Self {
        Self {
            timeout_ms: r.timeout.as_millis() as u64,
            max_cache_age_ms: r.max_cache_age.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `locus=debug`.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(PathBuf, serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Cannot read config {}: {}", path.display(), e),
            Self::Parse(path, e) => write!(f, "Invalid config {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            Self::Parse(_, e) => Some(e),
        }
    }
}

impl LocatorConfig {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".locus")
            .join("config.json")
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.apply_env(|k| std::env::var(k).ok());
        Ok(config)
    }

    /// Load a specific file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(path.to_path_buf(), e)),
        };
        serde_json::from_str(&data).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(key) = var(ENV_GOOGLE_KEY).filter(|k| !k.trim().is_empty()) {
            self.google_api_key = Some(key);
        }
        if let Some(level) = var(ENV_LOG).filter(|l| !l.trim().is_empty()) {
            self.logging.level = level;
        }
    }
}
