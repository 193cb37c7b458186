//! Configuration for the resident-model cache.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Eviction policy applied by the background sweep.
///
/// The three deployment policies observed in practice: keep the model until
/// it is replaced, unload it after a fixed idle window, or unload it as soon
/// as the last in-flight use finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Never evict on the timer; only a model switch or an explicit evict
    /// unloads the resident model.
    KeepResident,

    /// Evict once the model has been idle for longer than the threshold.
    FixedTimeout(Duration),

    /// Evict on the first sweep after the last lease is released.
    UnloadAfterUse,
}

impl EvictionPolicy {
    /// Idle duration after which a resident entry becomes eligible for
    /// eviction, or `None` if the timer never fires.
    #[must_use]
    pub fn idle_threshold(&self) -> Option<Duration> {
        match self {
            Self::KeepResident => None,
            Self::FixedTimeout(timeout) => Some(*timeout),
            Self::UnloadAfterUse => Some(Duration::ZERO),
        }
    }
}

/// File-facing name of an eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicyKind {
    /// `keep-resident`
    KeepResident,
    /// `fixed-timeout`
    FixedTimeout,
    /// `unload-after-use`
    UnloadAfterUse,
}

/// Configuration for the resident-model cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether the cache and its background sweep are enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Which eviction policy the sweep applies (default: `fixed-timeout`).
    #[serde(default = "default_policy")]
    pub policy: EvictionPolicyKind,

    /// Seconds a model may sit idle before the sweep unloads it
    /// (default: 180 = 3 minutes; only meaningful for `fixed-timeout`).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the sweep runs in seconds (default: 10).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_policy() -> EvictionPolicyKind {
    EvictionPolicyKind::FixedTimeout
}

fn default_idle_timeout_secs() -> u64 {
    180 // 3 minutes
}

fn default_sweep_interval_secs() -> u64 {
    10
}

/// Errors that can occur while validating or loading cache configuration.
#[derive(Debug, Error)]
pub enum CacheConfigError {
    /// Invalid idle timeout (fixed-timeout policy requires > 0).
    #[error("Invalid idle timeout: fixed-timeout policy requires a value greater than 0")]
    InvalidIdleTimeout,

    /// Invalid sweep interval (must be > 0).
    #[error("Invalid sweep interval: must be greater than 0")]
    InvalidSweepInterval,

    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            policy: default_policy(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Validates the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.policy == EvictionPolicyKind::FixedTimeout && self.idle_timeout_secs == 0 {
            return Err(CacheConfigError::InvalidIdleTimeout);
        }

        if self.sweep_interval_secs == 0 {
            return Err(CacheConfigError::InvalidSweepInterval);
        }

        Ok(())
    }

    /// The runtime eviction policy this configuration describes.
    #[must_use]
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self.policy {
            EvictionPolicyKind::KeepResident => EvictionPolicy::KeepResident,
            EvictionPolicyKind::FixedTimeout => EvictionPolicy::FixedTimeout(self.idle_timeout()),
            EvictionPolicyKind::UnloadAfterUse => EvictionPolicy::UnloadAfterUse,
        }
    }

    /// Gets the idle timeout as a Duration.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Gets the sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Loads cache configuration from a TOML config file.
///
/// Reads the `[cache]` section of the file at `path`. A missing file or a
/// missing section yields the default configuration.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed, or if
/// the parsed configuration fails validation.
pub fn load_cache_config(path: &Path) -> Result<CacheConfig, CacheConfigError> {
    if !path.exists() {
        return Ok(CacheConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content)?;

    if let Some(cache) = table.get("cache") {
        let cache_str = toml::to_string(cache).map_err(|e| {
            CacheConfigError::Validation(format!("Failed to serialize cache config: {e}"))
        })?;

        let config: CacheConfig = toml::from_str(&cache_str)?;
        config.validate()?;
        return Ok(config);
    }

    Ok(CacheConfig::default())
}
