use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig(format!(
                "retry.{name}.max_retries must be at least 1"
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(format!("retry.{name}.timeout_ms must be > 0")));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.{name}.base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Divide strategies by operation
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Per-scrape metric service retrieval; bounded so a scrape cannot hang
    #[serde(default = "default_metric_service_policy")]
    pub metric_service: BackoffPolicy,

    /// Re-population after a notification channel loss
    #[serde(default = "default_populate_policy")]
    pub populate: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            metric_service: default_metric_service_policy(),
            populate: default_populate_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.metric_service.validate("metric_service")?;
        self.populate.validate("populate")?;
        Ok(())
    }
}

fn default_metric_service_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        timeout_ms: 10_000,
        base_delay_ms: 500,
        max_delay_ms: 4_000,
    }
}
fn default_populate_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 10,
        timeout_ms: 120_000,
        base_delay_ms: 1_000,
        max_delay_ms: 60_000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    10_000
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    5_000
}
