use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Where the values of a metric group come from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    /// Point-in-time values fetched from the console metric service per scrape
    MetricService,
    /// Values read from cached resource properties
    #[default]
    ResourceProperty,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MetricGroupConfig {
    pub name: String,

    #[serde(default)]
    pub kind: GroupKind,

    /// Class whose resources feed (or label) the group's values
    #[serde(default)]
    pub resource_class: Option<String>,

    /// Metric service group name; defaults to `name`
    #[serde(default)]
    pub metric_service_group: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub labels: Vec<LabelDefinition>,

    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
}

/// An exported label and the expression producing its value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LabelDefinition {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MetricDefinition {
    /// Exported metric name
    pub name: String,

    #[serde(default)]
    pub help: String,

    #[serde(default)]
    pub kind: MetricKind,

    /// Property (resource groups) or metric field (metric service groups)
    pub source: String,

    /// Source value is a percentage; exported as a 0..1 ratio
    #[serde(default)]
    pub percent: bool,

    /// Mapping of enum-like string values to numbers
    #[serde(default)]
    pub value_map: BTreeMap<String, f64>,
}

impl MetricGroupConfig {
    pub fn service_group(&self) -> &str {
        self.metric_service_group.as_deref().unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("metric group name cannot be empty".into()));
        }
        if self.kind == GroupKind::ResourceProperty && self.resource_class.is_none() {
            return Err(Error::InvalidConfig(format!(
                "metric group '{}' reads resource properties but names no resource_class",
                self.name
            )));
        }

        let mut labels = HashSet::new();
        for label in &self.labels {
            if label.name.is_empty() || !labels.insert(label.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "metric group '{}': label '{}' is empty or duplicated",
                    self.name, label.name
                )));
            }
        }
        for metric in &self.metrics {
            if metric.name.is_empty() || metric.source.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "metric group '{}': metric definitions need a name and a source",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
