use std::sync::Arc;

use tokio::time::Instant;

use crate::Resource;
use crate::ResourceClass;
use crate::ResourceStore;
use crate::ResourceUri;

/// Immutable view of the resource store at one instant.
///
/// Only accessible resources are visible through the lookup methods; every
/// label and value derived during a scrape comes from the same snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: Arc<ResourceStore>,
    taken_at: Instant,
}

impl Snapshot {
    pub(crate) fn new(store: Arc<ResourceStore>) -> Self {
        Self {
            store,
            taken_at: Instant::now(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.store.iter().filter(|r| r.accessible).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(
        &self,
        uri: &ResourceUri,
    ) -> bool {
        self.get(uri).is_some()
    }

    pub fn get(
        &self,
        uri: &ResourceUri,
    ) -> Option<&Resource> {
        self.store
            .get(uri)
            .filter(|r| r.accessible)
            .map(|r| r.as_ref())
    }

    pub fn parent(
        &self,
        resource: &Resource,
    ) -> Option<&Resource> {
        resource.parent.as_ref().and_then(|p| self.get(p))
    }

    /// Accessible resources of a class, ordered by URI.
    pub fn resources_of(
        &self,
        class: ResourceClass,
    ) -> Vec<&Resource> {
        let mut resources: Vec<&Resource> = self
            .store
            .of_class(class)
            .filter(|r| r.accessible)
            .map(|r| r.as_ref())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    /// URIs of all visible resources, sorted.
    pub fn uris(&self) -> Vec<ResourceUri> {
        let mut uris: Vec<ResourceUri> = self
            .store
            .iter()
            .filter(|r| r.accessible)
            .map(|r| r.uri.clone())
            .collect();
        uris.sort();
        uris
    }

    /// Accessible resources of a class that receive no change notifications.
    pub fn without_notifications(
        &self,
        class: ResourceClass,
    ) -> Vec<&Resource> {
        self.resources_of(class)
            .into_iter()
            .filter(|r| !r.auto_update)
            .collect()
    }
}
