//! Remote resource model: identities, classes, property values and the
//! keyed store that holds them.
//!
//! Resources form a tree through parent URIs. The tree is kept as a flat
//! arena keyed by [`ResourceUri`]; nothing holds references into it across
//! mutations, so removing one entry never invalidates another.

mod class;
mod property;
mod store;

pub use class::*;
pub use property::*;
pub use store::*;


use std::fmt;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

/// Stable identifier of a remote resource (the console object URI).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceUri(String);

impl ResourceUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceUri {
    fn from(uri: &str) -> Self {
        Self(uri.to_string())
    }
}

impl From<String> for ResourceUri {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

/// One row of a bulk listing as returned by the console client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub uri: ResourceUri,
    pub class: ResourceClass,
    pub parent: Option<ResourceUri>,
    pub properties: PropertyMap,
    /// `false` when the object is visible but its properties are not readable
    pub accessible: bool,
}

impl ResourceRecord {
    pub fn new(
        uri: impl Into<ResourceUri>,
        class: ResourceClass,
        parent: Option<ResourceUri>,
    ) -> Self {
        Self {
            uri: uri.into(),
            class,
            parent,
            properties: PropertyMap::new(),
            accessible: true,
        }
    }

    pub fn with_property(
        mut self,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn inaccessible(mut self) -> Self {
        self.accessible = false;
        self
    }
}

/// A cached remote resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub uri: ResourceUri,
    pub class: ResourceClass,
    pub parent: Option<ResourceUri>,
    pub properties: PropertyMap,
    pub accessible: bool,
    /// Whether change notifications were successfully registered
    pub auto_update: bool,
    pub updated_at: SystemTime,
}

impl Resource {
    pub fn from_record(
        record: ResourceRecord,
        auto_update: bool,
    ) -> Self {
        Self {
            uri: record.uri,
            class: record.class,
            parent: record.parent,
            properties: record.properties,
            accessible: record.accessible,
            auto_update,
            updated_at: SystemTime::now(),
        }
    }

    pub fn property(
        &self,
        name: &str,
    ) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn name(&self) -> Option<&str> {
        match self.properties.get("name") {
            Some(PropertyValue::Text(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}
