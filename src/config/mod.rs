//! Configuration management for the exporter.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (TOML or YAML, chosen by extension)
//! - Environment variable overrides
//! - Component-wise validation
mod fetch;
mod logging;
mod metric_group;
mod resources;
mod retry;
mod server;
mod targets;
pub use fetch::*;
pub use logging::*;
pub use metric_group::*;
pub use resources::*;
pub use retry::*;
pub use server::*;
pub use targets::*;

use std::collections::HashSet;
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables with `ZHMC__` prefix (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Metrics endpoint
    #[serde(default)]
    pub server: ServerConfig,
    /// Systems the exporter is scoped to
    #[serde(default)]
    pub targets: TargetsConfig,
    /// Background property polling
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Retry policies for console operations
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Per resource class overrides
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub metric_groups: Vec<MetricGroupConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/exporter.yaml");
    /// std::env::set_var("ZHMC__SERVER__PORT", "9292");
    /// let settings = Settings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates configuration and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.fetch.validate()?;
        self.retry.validate()?;
        self.resources.validate()?;

        let mut names = HashSet::new();
        for group in &self.metric_groups {
            if !names.insert(group.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate metric group '{}'",
                    group.name
                )));
            }
            group.validate()?;
        }
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix("ZHMC")
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
