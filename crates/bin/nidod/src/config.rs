//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `nido.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Geographic location for sun-relative schedules.
    pub location: LocationConfig,
    /// Event bus tuning.
    pub bus: BusSection,
    /// Rule engine tuning.
    pub engine: EngineConfig,
    /// Command dispatcher tuning.
    pub dispatcher: DispatcherSection,
    /// Persistence settings.
    pub storage: StorageConfig,
    /// Integration toggles.
    pub integrations: IntegrationsConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Location for sunrise/sunset computation.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

/// Event bus tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Retained events for replay after restart.
    pub retention: usize,
    /// Per-subscriber queue bound before low-priority events drop.
    pub queue_bound: usize,
}

/// Rule engine tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent evaluation workers.
    pub workers: usize,
}

/// Command dispatcher tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Per-attempt acknowledgement deadline, milliseconds.
    pub command_timeout_ms: u64,
    /// First backoff delay, milliseconds; doubles per attempt.
    pub backoff_base_ms: u64,
}

/// Persistence settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `rules.json`, `scenes.json`, `devices.json` and
    /// `cursors.json`.
    pub data_dir: String,
}

/// Per-integration toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Enable the virtual/demo integration.
    pub virtual_enabled: bool,
}

impl Config {
    /// Load configuration from `nido.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("nido.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NIDO_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("NIDO_LATITUDE") {
            if let Ok(latitude) = val.parse() {
                self.location.latitude = latitude;
            }
        }
        if let Ok(val) = std::env::var("NIDO_LONGITUDE") {
            if let Ok(longitude) = val.parse() {
                self.location.longitude = longitude;
            }
        }
        if let Ok(val) = std::env::var("NIDO_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("NIDO_WORKERS") {
            if let Ok(workers) = val.parse() {
                self.engine.workers = workers;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.workers == 0 {
            return Err(ConfigError::Validation(
                "engine.workers must be non-zero".to_string(),
            ));
        }
        if self.bus.queue_bound == 0 {
            return Err(ConfigError::Validation(
                "bus.queue_bound must be non-zero".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(ConfigError::Validation(
                "location.latitude must be within -90..=90".to_string(),
            ));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(ConfigError::Validation(
                "location.longitude must be within -180..=180".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "nidod=info,nido=info".to_string(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        // Greenwich observatory; override for real deployments.
        Self {
            latitude: 51.4769,
            longitude: 0.0,
        }
    }
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            retention: 1024,
            queue_bound: 256,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            command_timeout_ms: 5000,
            backoff_base_ms: 250,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            virtual_enabled: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
