use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::constants::{
    DEFAULT_FUZZY_MULTIPLIER, DEFAULT_FUZZY_THRESHOLD, DEFAULT_LOOKUP_TIMEOUT_MS,
    DEFAULT_PARTIAL_MULTIPLIER, DEFAULT_PLATFORM_CACHE_TTL_SECS,
};
use crate::error::{PipelineError, Result};

pub const CONFIG_PATH_ENV: &str = "SAVINGS_PIPELINE_CONFIG";
pub const DATABASE_PATH_ENV: &str = "SAVINGS_PIPELINE_DB";
pub const DEFAULT_CONFIG_PATH: &str = "pipeline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub platform: PlatformConfig,
    pub identity: IdentityConfig,
    /// Per-source policy overrides keyed by canonical source tag
    pub sources: HashMap<String, SourceOverride>,
    /// SQLite reference store; in-memory when absent
    pub database_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub cache_ttl_secs: u64,
    pub lookup_timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_PLATFORM_CACHE_TTL_SECS,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
        }
    }
}

impl PlatformConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub fuzzy_threshold: f64,
    pub partial_multiplier: f64,
    pub fuzzy_multiplier: f64,
    pub lookup_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            partial_multiplier: DEFAULT_PARTIAL_MULTIPLIER,
            fuzzy_multiplier: DEFAULT_FUZZY_MULTIPLIER,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
        }
    }
}

impl IdentityConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOverride {
    /// Let free-text title signals win over the page section the listing sits in
    pub title_overrides_section: Option<bool>,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the path named by the environment, falling back to defaults
    /// when no file exists there
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            info!("Loading pipeline config from {}", path);
            Self::load(&path)?
        } else {
            info!("No config file at {}, using defaults", path);
            Self::default()
        };

        if let Ok(db) = std::env::var(DATABASE_PATH_ENV) {
            config.database_path = Some(db);
        }

        Ok(config)
    }

    /// Validate thresholds and timings
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| -> Result<()> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(PipelineError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )))
            }
        };

        unit("identity.fuzzy_threshold", self.identity.fuzzy_threshold)?;
        unit("identity.partial_multiplier", self.identity.partial_multiplier)?;
        unit("identity.fuzzy_multiplier", self.identity.fuzzy_multiplier)?;

        if self.platform.cache_ttl_secs == 0 {
            return Err(PipelineError::Config(
                "platform.cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.platform.lookup_timeout_ms == 0 || self.identity.lookup_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "lookup timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
