use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use super::PropertyMap;
use super::Resource;
use super::ResourceClass;
use super::ResourceUri;

/// Keyed table of cached resources.
///
/// Resources are held behind `Arc` and replaced wholesale on every change, so
/// a clone of the store is a cheap, fully isolated view: later writes to the
/// original never show through it.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    resources: HashMap<ResourceUri, Arc<Resource>>,
    children: HashMap<ResourceUri, BTreeSet<ResourceUri>>,
    generation: u64,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn continue_from(
        &mut self,
        previous: u64,
    ) {
        self.generation = previous + 1;
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(
        &self,
        uri: &ResourceUri,
    ) -> Option<&Arc<Resource>> {
        self.resources.get(uri)
    }

    pub fn contains(
        &self,
        uri: &ResourceUri,
    ) -> bool {
        self.resources.contains_key(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    pub fn of_class(
        &self,
        class: ResourceClass,
    ) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values().filter(move |r| r.class == class)
    }

    pub fn children_of(
        &self,
        uri: &ResourceUri,
    ) -> Vec<&Arc<Resource>> {
        self.children
            .get(uri)
            .map(|kids| kids.iter().filter_map(|k| self.resources.get(k)).collect())
            .unwrap_or_default()
    }

    pub fn parent_of(
        &self,
        resource: &Resource,
    ) -> Option<&Arc<Resource>> {
        resource.parent.as_ref().and_then(|p| self.resources.get(p))
    }

    /// Whether every ancestor the class hierarchy requires is present and
    /// accessible.
    pub fn has_accessible_ancestry(
        &self,
        class: ResourceClass,
        parent: Option<&ResourceUri>,
    ) -> bool {
        let mut expected = class.parent();
        let mut next = parent;
        while let Some(expected_class) = expected {
            let Some(uri) = next else {
                return false;
            };
            match self.resources.get(uri) {
                Some(p) if p.accessible && p.class == expected_class => {
                    expected = expected_class.parent();
                    next = p.parent.as_ref();
                }
                _ => return false,
            }
        }
        true
    }

    /// Inserts or replaces the resource keyed by its URI.
    pub fn insert(
        &mut self,
        resource: Resource,
    ) -> Option<Arc<Resource>> {
        let uri = resource.uri.clone();
        if let Some(parent) = &resource.parent {
            self.children.entry(parent.clone()).or_default().insert(uri.clone());
        }
        let previous = self.resources.insert(uri.clone(), Arc::new(resource));
        if let Some(prev) = &previous {
            let reparented = prev.parent.as_ref() != self.resources[&uri].parent.as_ref();
            if reparented {
                self.unlink_child(prev.parent.as_ref(), &uri);
            }
        }
        self.generation += 1;
        previous
    }

    /// Removes the resource with exactly this URI together with its
    /// descendants. Unknown URIs remove nothing.
    pub fn remove(
        &mut self,
        uri: &ResourceUri,
    ) -> Vec<Arc<Resource>> {
        let mut removed = Vec::new();
        let mut pending = vec![uri.clone()];
        while let Some(next) = pending.pop() {
            let Some(resource) = self.resources.remove(&next) else {
                continue;
            };
            if let Some(kids) = self.children.remove(&next) {
                pending.extend(kids);
            }
            self.unlink_child(resource.parent.as_ref(), &next);
            removed.push(resource);
        }
        if !removed.is_empty() {
            self.generation += 1;
        }
        removed
    }

    /// Overwrites the given properties on an existing resource. Returns
    /// `false` when the resource is not cached.
    pub fn merge_properties(
        &mut self,
        uri: &ResourceUri,
        properties: PropertyMap,
    ) -> bool {
        let Some(current) = self.resources.get_mut(uri) else {
            return false;
        };
        let mut updated = Resource::clone(current);
        updated.properties.extend(properties);
        updated.updated_at = SystemTime::now();
        *current = Arc::new(updated);
        self.generation += 1;
        true
    }

    pub fn set_auto_update(
        &mut self,
        uri: &ResourceUri,
        auto_update: bool,
    ) -> bool {
        let Some(current) = self.resources.get_mut(uri) else {
            return false;
        };
        if current.auto_update != auto_update {
            let mut updated = Resource::clone(current);
            updated.auto_update = auto_update;
            *current = Arc::new(updated);
            self.generation += 1;
        }
        true
    }

    pub fn count_by_class(&self) -> BTreeMap<ResourceClass, usize> {
        let mut counts = BTreeMap::new();
        for resource in self.resources.values() {
            *counts.entry(resource.class).or_insert(0) += 1;
        }
        counts
    }

    fn unlink_child(
        &mut self,
        parent: Option<&ResourceUri>,
        child: &ResourceUri,
    ) {
        let Some(parent) = parent else {
            return;
        };
        if let Some(kids) = self.children.get_mut(parent) {
            kids.remove(child);
            if kids.is_empty() {
                self.children.remove(parent);
            }
        }
    }
}
