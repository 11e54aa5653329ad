//! Coordination module configuration.
//!
//! Loaded from TOML with sensible defaults for everything except `env`:
//!
//! ```toml
//! env = "prod"
//!
//! [lock]
//! retry_timeout_ms = 3000
//!
//! [registry]
//! reconcile_interval_secs = 60
//! discovery_refresh_interval_secs = 60
//!
//! [watch]
//! max_concurrent_callbacks = 10
//!
//! [clock_monitor]
//! node_id = "10.0.0.1"
//! ```
//!
//! `SCY_ENV` overrides `env` when set.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::constants::MAX_CONCURRENT_CALLBACKS;
use crate::lock::LockConfig;
use crate::pure::validate_segment;

/// Environment variable overriding [`CoordinationConfig::env`].
pub const ENV_OVERRIDE_VAR: &str = "SCY_ENV";

/// Default values for configuration
pub(crate) mod defaults {
    use crate::constants::*;

    pub fn lock_retry_timeout_ms() -> u64 { DEFAULT_LOCK_RETRY_TIMEOUT_MS }
    pub fn reconcile_interval_secs() -> u64 { DEFAULT_RECONCILE_INTERVAL_SECS }
    pub fn discovery_refresh_interval_secs() -> u64 { DEFAULT_DISCOVERY_REFRESH_INTERVAL_SECS }
    pub fn registry_initial_delay_secs() -> u64 { 0 }
    pub fn max_concurrent_callbacks() -> usize { DEFAULT_MAX_CONCURRENT_CALLBACKS }
    pub fn clock_initial_delay_secs() -> u64 { DEFAULT_CLOCK_INITIAL_DELAY_SECS }
    pub fn clock_interval_secs() -> u64 { DEFAULT_CLOCK_INTERVAL_SECS }
}

/// Configuration loading and validation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile {
        /// File that failed to load.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema.
    #[snafu(display("failed to parse config: {source}"))]
    Parse {
        /// The underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[snafu(display("invalid value for '{key}': {reason}"))]
    InvalidValue {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Registry and discovery timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Period between re-assertions of every desired registration.
    #[serde(default = "defaults::reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Period between full refreshes of every cached service key.
    #[serde(default = "defaults::discovery_refresh_interval_secs")]
    pub discovery_refresh_interval_secs: u64,
    /// Delay before the first periodic run.
    #[serde(default = "defaults::registry_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: defaults::reconcile_interval_secs(),
            discovery_refresh_interval_secs: defaults::discovery_refresh_interval_secs(),
            initial_delay_secs: defaults::registry_initial_delay_secs(),
        }
    }
}

impl RegistryConfig {
    /// Re-assertion period.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Full refresh period.
    pub fn discovery_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_refresh_interval_secs)
    }

    /// Delay before the first periodic run.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

/// Watch callback execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Callbacks allowed to run concurrently.
    #[serde(default = "defaults::max_concurrent_callbacks")]
    pub max_concurrent_callbacks: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_callbacks: defaults::max_concurrent_callbacks(),
        }
    }
}

/// Clock watermark monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockMonitorConfig {
    /// Identity of this node (typically its IP address).
    pub node_id: String,
    /// Delay before the first upload.
    #[serde(default = "defaults::clock_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Upload period.
    #[serde(default = "defaults::clock_interval_secs")]
    pub interval_secs: u64,
}

impl ClockMonitorConfig {
    /// Create a monitor config with default timings.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            initial_delay_secs: defaults::clock_initial_delay_secs(),
            interval_secs: defaults::clock_interval_secs(),
        }
    }
}

/// Top-level coordination configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Deployment environment; the second segment of registry paths.
    pub env: String,
    /// Lock settings.
    #[serde(default)]
    pub lock: LockConfig,
    /// Registry and discovery settings.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Watch callback settings.
    #[serde(default)]
    pub watch: WatchConfig,
    /// Clock monitor, disabled when absent.
    #[serde(default)]
    pub clock_monitor: Option<ClockMonitorConfig>,
}

impl CoordinationConfig {
    /// Configuration for `env` with every other setting at its default.
    pub fn new(env: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            lock: LockConfig::default(),
            registry: RegistryConfig::default(),
            watch: WatchConfig::default(),
            clock_monitor: None,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, apply environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let mut config: Self = toml::from_str(&content).context(ParseSnafu)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(env) = lookup(ENV_OVERRIDE_VAR).filter(|v| !v.is_empty()) {
            self.env = env;
        }
    }

    /// Check every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(reason) = validate_segment(&self.env) {
            return invalid("env", reason);
        }
        if self.lock.retry_timeout_ms == 0 {
            return invalid("lock.retry_timeout_ms", "must be greater than 0");
        }
        if self.registry.reconcile_interval_secs == 0 {
            return invalid("registry.reconcile_interval_secs", "must be greater than 0");
        }
        if self.registry.discovery_refresh_interval_secs == 0 {
            return invalid("registry.discovery_refresh_interval_secs", "must be greater than 0");
        }
        if self.watch.max_concurrent_callbacks == 0 || self.watch.max_concurrent_callbacks > MAX_CONCURRENT_CALLBACKS {
            return InvalidValueSnafu {
                key: "watch.max_concurrent_callbacks",
                reason: format!("must be between 1 and {MAX_CONCURRENT_CALLBACKS}"),
            }
            .fail();
        }
        if let Some(clock) = &self.clock_monitor {
            if let Err(reason) = validate_segment(&clock.node_id) {
                return invalid("clock_monitor.node_id", reason);
            }
            if clock.interval_secs == 0 {
                return invalid("clock_monitor.interval_secs", "must be greater than 0");
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> Result<(), ConfigError> {
    InvalidValueSnafu { key, reason }.fail()
}
