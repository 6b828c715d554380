use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::debug;
use tracing::warn;

use crate::ClassDescriptor;
use crate::GroupKind;
use crate::MetricGroupConfig;
use crate::ResourceClass;
use crate::ResourcesConfig;

/// Why a class is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassRole {
    /// Directly needed by a metric group
    Primary,
    /// Needed only to resolve labels up the hierarchy
    Ancestor,
}

#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub descriptor: ClassDescriptor,
    pub role: ClassRole,
    /// Properties read by metric definitions of groups on this class
    pub metric_properties: BTreeSet<String>,
}

/// An enabled metric group with its class reference resolved.
#[derive(Debug, Clone)]
pub struct ResolvedGroup {
    pub config: MetricGroupConfig,
    pub class: Option<ResourceClass>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledGroup {
    pub name: String,
    pub reason: String,
}

/// Closure of resource classes to cache plus the groups that need them.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    classes: BTreeMap<ResourceClass, ClassEntry>,
    groups: Vec<ResolvedGroup>,
    disabled: Vec<DisabledGroup>,
}

impl DependencySet {
    pub fn contains(
        &self,
        class: ResourceClass,
    ) -> bool {
        self.classes.contains_key(&class)
    }

    pub fn entry(
        &self,
        class: ResourceClass,
    ) -> Option<&ClassEntry> {
        self.classes.get(&class)
    }

    pub fn descriptor(
        &self,
        class: ResourceClass,
    ) -> Option<&ClassDescriptor> {
        self.classes.get(&class).map(|e| &e.descriptor)
    }

    pub fn role(
        &self,
        class: ResourceClass,
    ) -> Option<ClassRole> {
        self.classes.get(&class).map(|e| e.role)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Cached classes, ancestors before their descendants.
    pub fn classes_in_order(&self) -> Vec<&ClassDescriptor> {
        let mut descriptors: Vec<&ClassDescriptor> = self.classes.values().map(|e| &e.descriptor).collect();
        descriptors.sort_by_key(|d| (d.class.depth(), d.class));
        descriptors
    }

    pub fn poll_eligible(&self) -> Vec<&ClassDescriptor> {
        self.classes_in_order()
            .into_iter()
            .filter(|d| d.is_poll_eligible())
            .collect()
    }

    pub fn resource_groups(&self) -> impl Iterator<Item = &ResolvedGroup> {
        self.groups
            .iter()
            .filter(|g| g.config.kind == GroupKind::ResourceProperty)
    }

    pub fn metric_service_groups(&self) -> impl Iterator<Item = &ResolvedGroup> {
        self.groups.iter().filter(|g| g.config.kind == GroupKind::MetricService)
    }

    pub fn disabled_groups(&self) -> &[DisabledGroup] {
        &self.disabled
    }
}

pub struct DependencyResolver<'a> {
    groups: &'a [MetricGroupConfig],
    resources: &'a ResourcesConfig,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(
        groups: &'a [MetricGroupConfig],
        resources: &'a ResourcesConfig,
    ) -> Self {
        Self { groups, resources }
    }

    /// Computes the dependency set. Groups referencing an unsupported class
    /// are disabled and reported, never fatal.
    pub fn resolve(&self) -> DependencySet {
        let mut set = DependencySet::default();

        for group in self.groups.iter().filter(|g| g.enabled) {
            let class = match group.resource_class.as_deref().map(str::parse::<ResourceClass>) {
                None => None,
                Some(Ok(class)) => Some(class),
                Some(Err(reason)) => {
                    warn!("metric group '{}' disabled: {}", group.name, reason);
                    set.disabled.push(DisabledGroup {
                        name: group.name.clone(),
                        reason,
                    });
                    continue;
                }
            };

            if let Some(class) = class {
                let entry = self.entry(&mut set, class, ClassRole::Primary);
                if group.kind == GroupKind::ResourceProperty {
                    entry
                        .metric_properties
                        .extend(group.metrics.iter().map(|m| m.source.clone()));
                }
                for ancestor in class.ancestors() {
                    self.entry(&mut set, ancestor, ClassRole::Ancestor);
                }
            }

            set.groups.push(ResolvedGroup {
                config: group.clone(),
                class,
            });
        }

        debug!(
            "resolved {} cached classes for {} metric groups",
            set.classes.len(),
            set.groups.len()
        );
        set
    }

    /// Registers a class, upgrading an ancestor to primary when needed.
    fn entry<'s>(
        &self,
        set: &'s mut DependencySet,
        class: ResourceClass,
        role: ClassRole,
    ) -> &'s mut ClassEntry {
        let entry = set.classes.entry(class).or_insert_with(|| ClassEntry {
            descriptor: self.resources.descriptor(class),
            role,
            metric_properties: BTreeSet::new(),
        });
        if role == ClassRole::Primary {
            entry.role = ClassRole::Primary;
        }
        entry
    }
}
