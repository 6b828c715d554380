use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::ClassDescriptor;
use crate::Error;
use crate::ResourceClass;
use crate::Result;

/// Overrides of the built-in class behaviour, keyed by class name
/// (e.g. `partition`, `storage-volume`).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct ResourcesConfig {
    pub classes: BTreeMap<String, ResourceClassConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ResourceClassConfig {
    /// Whether the console emits change notifications for the class
    #[serde(default)]
    pub notifications: Option<bool>,

    /// Properties refreshed by polling instead of notifications
    #[serde(default)]
    pub poll_properties: Option<Vec<String>>,
}

impl ResourcesConfig {
    pub fn validate(&self) -> Result<()> {
        for name in self.classes.keys() {
            name.parse::<ResourceClass>()
                .map_err(|e| Error::InvalidConfig(format!("resources: {e}")))?;
        }
        Ok(())
    }

    /// Built-in descriptor with this configuration's overrides applied.
    pub fn descriptor(
        &self,
        class: ResourceClass,
    ) -> ClassDescriptor {
        let mut descriptor = ClassDescriptor::builtin(class);
        if let Some(overrides) = self.classes.get(class.as_str()) {
            if let Some(notifications) = overrides.notifications {
                descriptor.notifications = notifications;
            }
            if let Some(poll_properties) = &overrides.poll_properties {
                descriptor.poll_properties = poll_properties.clone();
            }
        }
        descriptor
    }
}
