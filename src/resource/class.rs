use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Resource classes the exporter knows how to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    Cpc,
    Partition,
    LogicalPartition,
    Adapter,
    NetworkPort,
    Nic,
    StorageGroup,
    StorageVolume,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 8] = [
        ResourceClass::Cpc,
        ResourceClass::Partition,
        ResourceClass::LogicalPartition,
        ResourceClass::Adapter,
        ResourceClass::NetworkPort,
        ResourceClass::Nic,
        ResourceClass::StorageGroup,
        ResourceClass::StorageVolume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Cpc => "cpc",
            ResourceClass::Partition => "partition",
            ResourceClass::LogicalPartition => "logical-partition",
            ResourceClass::Adapter => "adapter",
            ResourceClass::NetworkPort => "network-port",
            ResourceClass::Nic => "nic",
            ResourceClass::StorageGroup => "storage-group",
            ResourceClass::StorageVolume => "storage-volume",
        }
    }

    /// Static hierarchy rule: the class every resource of this class hangs off.
    pub fn parent(&self) -> Option<ResourceClass> {
        match self {
            ResourceClass::Cpc => None,
            ResourceClass::Partition
            | ResourceClass::LogicalPartition
            | ResourceClass::Adapter
            | ResourceClass::StorageGroup => Some(ResourceClass::Cpc),
            ResourceClass::NetworkPort => Some(ResourceClass::Adapter),
            ResourceClass::Nic => Some(ResourceClass::Partition),
            ResourceClass::StorageVolume => Some(ResourceClass::StorageGroup),
        }
    }

    /// Number of ancestor classes above this one.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(class) = current {
            depth += 1;
            current = class.parent();
        }
        depth
    }

    /// Ancestor classes, nearest first.
    pub fn ancestors(&self) -> Vec<ResourceClass> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(class) = current {
            ancestors.push(class);
            current = class.parent();
        }
        ancestors
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceClass::ALL
            .iter()
            .find(|class| class.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unsupported resource class '{s}'"))
    }
}

/// Static per-class behaviour, derived from built-in defaults and
/// configuration overrides. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub class: ResourceClass,
    pub parent: Option<ResourceClass>,
    /// Console emits property-change notifications for this class
    pub notifications: bool,
    /// Properties without notification support, refreshed by polling
    pub poll_properties: Vec<String>,
    /// Properties a cached resource must carry; fetched when a create
    /// notification arrives without them
    pub mandatory_properties: Vec<String>,
}

impl ClassDescriptor {
    pub fn builtin(class: ResourceClass) -> Self {
        let (notifications, poll_properties) = match class {
            ResourceClass::NetworkPort => (false, vec!["description"]),
            ResourceClass::StorageVolume => (false, vec!["usage", "fulfillment-state", "size"]),
            ResourceClass::Cpc
            | ResourceClass::Partition
            | ResourceClass::LogicalPartition
            | ResourceClass::Adapter
            | ResourceClass::Nic
            | ResourceClass::StorageGroup => (true, Vec::new()),
        };

        Self {
            class,
            parent: class.parent(),
            notifications,
            poll_properties: poll_properties.iter().map(|p| p.to_string()).collect(),
            mandatory_properties: vec!["name".to_string()],
        }
    }

    pub fn is_poll_eligible(&self) -> bool {
        !self.poll_properties.is_empty()
    }
}
