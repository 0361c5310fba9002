//! Configuration management for silo hosts.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation, deferred until the settings are final
mod cluster;
mod lifecycle;
mod monitoring;
mod retry;
pub use cluster::*;
pub use lifecycle::*;
pub use monitoring::*;
pub use retry::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix of the environment variables that override settings,
/// e.g. `SILO__CLUSTER__LIVENESS_KIND=custom`.
pub const ENV_PREFIX: &str = "SILO";

/// Root settings of a silo host
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SiloConfig {
    /// Cluster identity and membership provider selection
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Timing bounds of the lifecycle controller
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Bounds for a single startup attempt
    #[serde(default)]
    pub retry: AttemptPolicy,
    /// Metrics and log output
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl SiloConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `SILO__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration, so that settings can
    /// be corrected between attempts. Call `validate()` once all overrides
    /// are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/silo.toml");
    /// std::env::set_var("SILO__CLUSTER__CLUSTER_ID", "orders");
    /// let cfg = SiloConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.cluster.validate()?;
        self.lifecycle.validate()?;
        self.retry.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
