//! Application configuration.
//!
//! Loaded from a YAML file plus `EVENTUM`-prefixed environment variables,
//! every field defaulting to a working in-memory setup.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "eventum.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "EVENTUM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EVENTUM";

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bounded in-memory cache sizing.
    pub cache: CacheConfig,
    /// SQL recorder configuration.
    pub storage: SqlStorageConfig,
}

/// Capacity limits for the bounded in-memory recorder, counted in stored
/// items, not keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub snapshot_capacity: usize,
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_capacity: 128,
            event_capacity: 1024,
        }
    }
}

/// SQL recorder configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlStorageConfig {
    /// Database connection URL.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for SqlStorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
        }
    }
}

impl Config {
    /// Load configuration, later sources overriding earlier ones: default
    /// file, explicit `path`, `EVENTUM_CONFIG` file, then environment
    /// variables (`EVENTUM__STORAGE__URL=...`).
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }
        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
