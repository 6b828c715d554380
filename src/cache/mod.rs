//! Resource cache: owns the store and is its only writer.
//!
//! ## Consistency
//! - Writers (population, notifications, poll results) are serialized by one
//!   mutex. Each mutation builds the next store from the current one and
//!   publishes it with a single atomic swap.
//! - A population holds the write side of `population` from its first listing
//!   until its swap. Notifications and poll results hold the read side, so
//!   none of them commits while a listing is in flight and is then reverted by
//!   the swap.
//! - Readers load the published `Arc` without locking. A reader therefore sees
//!   either all of a mutation or none of it.
//!
//! Population builds a complete store off to the side and swaps it in at once,
//! so a re-population is never observed half done.

mod snapshot;
pub use snapshot::*;


use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashSet;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::metrics::CACHED_RESOURCES;
use crate::metrics::NOTIFICATIONS_APPLIED;
use crate::ChangeEvent;
use crate::ChangeKind;
use crate::ClassDescriptor;
use crate::ConsoleClient;
use crate::DependencySet;
use crate::PropertyMap;
use crate::PropertyValue;
use crate::Resource;
use crate::ResourceClass;
use crate::ResourceRecord;
use crate::ResourceStore;
use crate::ResourceUri;
use crate::Result;
use crate::TargetScope;

/// Result of applying one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Created,
    Updated,
    /// Number of resources removed, the target plus its descendants
    Deleted(usize),
    /// Stale, duplicate or out-of-scope event; nothing changed
    Ignored,
}

/// Summary of one population run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateReport {
    pub cached: BTreeMap<ResourceClass, usize>,
    /// Accessible resources dropped because an ancestor is not accessible
    pub excluded: usize,
    /// Resources whose notification registration failed
    pub unsubscribed: usize,
}

pub struct ResourceCache {
    client: Arc<dyn ConsoleClient>,
    dependencies: Arc<DependencySet>,
    scope: TargetScope,
    current: ArcSwap<ResourceStore>,
    writer: Mutex<()>,
    population: RwLock<()>,
    subscriptions: DashSet<ResourceUri>,
    /// URIs already reported as inaccessible or orphaned
    reported: DashSet<ResourceUri>,
}

impl ResourceCache {
    pub fn new(
        client: Arc<dyn ConsoleClient>,
        dependencies: Arc<DependencySet>,
        scope: TargetScope,
    ) -> Self {
        Self {
            client,
            dependencies,
            scope,
            current: ArcSwap::from_pointee(ResourceStore::new()),
            writer: Mutex::new(()),
            population: RwLock::new(()),
            subscriptions: DashSet::new(),
            reported: DashSet::new(),
        }
    }

    pub fn dependencies(&self) -> &Arc<DependencySet> {
        &self.dependencies
    }

    pub fn scope(&self) -> &TargetScope {
        &self.scope
    }

    /// Consistent read-only view of the current store.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.current.load_full())
    }

    pub fn is_subscribed(
        &self,
        uri: &ResourceUri,
    ) -> bool {
        self.subscriptions.contains(uri)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Forget every subscription; the transport that carried them is gone.
    pub fn invalidate_subscriptions(&self) {
        self.subscriptions.clear();
    }

    /// Lists every class of the dependency set (ancestors first), registers
    /// notification interest and replaces the store in one swap.
    ///
    /// # Errors
    /// Fails when a listing fails for any reason other than missing
    /// permission. The published store is left untouched in that case.
    #[instrument(skip(self))]
    pub async fn populate(&self) -> Result<PopulateReport> {
        let _population = self.population.write().await;
        let mut next = ResourceStore::new();
        let mut report = PopulateReport::default();

        for descriptor in self.dependencies.classes_in_order() {
            let records = match self.client.list_resources(descriptor.class, &self.scope).await {
                Ok(records) => records,
                Err(e) if e.is_access_gap() => {
                    warn!("listing {} not permitted, treated as empty: {}", descriptor.class, e);
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };

            let admitted = self.admit_records(&next, descriptor, records, &mut report);
            let subscribed = self.register_all(descriptor, &admitted).await?;

            for record in admitted {
                let auto_update = subscribed.get(&record.uri).copied().unwrap_or(false);
                if descriptor.notifications && record.accessible && !auto_update {
                    report.unsubscribed += 1;
                }
                next.insert(Resource::from_record(record, auto_update));
            }
        }

        report.cached = next.count_by_class();
        {
            let _guard = self.writer.lock();
            next.continue_from(self.current.load().generation());
            self.current.store(Arc::new(next));
        }
        self.publish_gauges();

        info!(
            "cache populated: {:?}, {} excluded, {} without notifications",
            report.cached, report.excluded, report.unsubscribed
        );
        Ok(report)
    }

    /// Applies one pushed change.
    ///
    /// Identity is the event's URI. Deletes and updates of unknown resources
    /// are no-ops; a create of a known resource merges its properties.
    pub async fn apply_notification(
        &self,
        event: ChangeEvent,
    ) -> Result<NotificationOutcome> {
        let _applying = self.population.read().await;
        let outcome = match event.kind {
            ChangeKind::Delete => self.apply_delete(&event.uri),
            ChangeKind::Update => self.apply_update(event.class, &event.uri, event.properties),
            ChangeKind::Create => self.apply_create(event).await?,
        };

        if outcome != NotificationOutcome::Ignored {
            self.publish_gauges();
        }
        trace!("notification outcome: {:?}", outcome);
        Ok(outcome)
    }

    /// Overwrites only the given properties; discarded when the resource has
    /// gone away in the meantime. Waits for a running population to finish.
    pub async fn apply_poll_result(
        &self,
        class: ResourceClass,
        uri: &ResourceUri,
        properties: PropertyMap,
    ) -> bool {
        let _applying = self.population.read().await;
        let applied = self.mutate(|store| {
            let known = store.get(uri).is_some_and(|r| r.class == class);
            known && store.merge_properties(uri, properties)
        });
        if !applied {
            debug!("poll result for {} discarded, resource not cached", uri);
        }
        applied
    }

    fn apply_delete(
        &self,
        uri: &ResourceUri,
    ) -> NotificationOutcome {
        let removed = self.mutate(|store| store.remove(uri));
        if removed.is_empty() {
            debug!("delete of unknown resource {} ignored", uri);
            return NotificationOutcome::Ignored;
        }
        for resource in &removed {
            self.subscriptions.remove(&resource.uri);
            self.reported.remove(&resource.uri);
        }
        NOTIFICATIONS_APPLIED.with_label_values(&[ChangeKind::Delete.as_str()]).inc();
        NotificationOutcome::Deleted(removed.len())
    }

    fn apply_update(
        &self,
        class: ResourceClass,
        uri: &ResourceUri,
        properties: PropertyMap,
    ) -> NotificationOutcome {
        let applied = self.mutate(|store| {
            let known = store.get(uri).is_some_and(|r| r.class == class);
            known && store.merge_properties(uri, properties)
        });
        if !applied {
            debug!("update of unknown resource {} ignored", uri);
            return NotificationOutcome::Ignored;
        }
        NOTIFICATIONS_APPLIED.with_label_values(&[ChangeKind::Update.as_str()]).inc();
        NotificationOutcome::Updated
    }

    async fn apply_create(
        &self,
        event: ChangeEvent,
    ) -> Result<NotificationOutcome> {
        let Some(descriptor) = self.dependencies.descriptor(event.class) else {
            trace!("create of uncached class {} ignored", event.class);
            return Ok(NotificationOutcome::Ignored);
        };

        if self.current.load().contains(&event.uri) {
            return Ok(self.apply_update(event.class, &event.uri, event.properties));
        }

        let mut properties = event.properties;
        let missing: Vec<String> = descriptor
            .mandatory_properties
            .iter()
            .filter(|p| !properties.contains_key(*p))
            .cloned()
            .collect();
        let mut accessible = true;
        if !missing.is_empty() {
            match self.client.fetch_properties(&event.uri, &missing).await {
                Ok(fetched) => properties.extend(fetched),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) if e.is_access_gap() => {
                    self.report_once(&event.uri, || {
                        warn!("created resource {} is not accessible: {}", event.uri, e)
                    });
                    accessible = false;
                }
                Err(e) => {
                    // picked up again by the next population
                    warn!("created {} {} skipped, properties unavailable: {}", event.class, event.uri, e);
                    return Ok(NotificationOutcome::Ignored);
                }
            }
        }

        if event.class.parent().is_none() && !self.in_scope(&properties) {
            debug!("created {} {} is outside the target scope", event.class, event.uri);
            return Ok(NotificationOutcome::Ignored);
        }

        let record = ResourceRecord {
            uri: event.uri.clone(),
            class: event.class,
            parent: event.parent,
            properties,
            accessible,
        };
        let inserted = self.mutate(|store| {
            if store.contains(&record.uri) {
                // created meanwhile by a concurrent event for the same URI
                return store.merge_properties(&record.uri, record.properties.clone());
            }
            if record.accessible
                && !store.has_accessible_ancestry(record.class, record.parent.as_ref())
            {
                return false;
            }
            store.insert(Resource::from_record(record.clone(), false));
            true
        });

        if !inserted {
            self.report_once(&event.uri, || {
                warn!(
                    "created {} {} excluded: ancestor missing or not accessible",
                    event.class, event.uri
                )
            });
            return Ok(NotificationOutcome::Ignored);
        }

        if accessible && descriptor.notifications && self.register(&event.uri).await? {
            let still_cached = self.mutate(|store| store.set_auto_update(&event.uri, true));
            if !still_cached {
                self.subscriptions.remove(&event.uri);
            }
        }
        NOTIFICATIONS_APPLIED.with_label_values(&[ChangeKind::Create.as_str()]).inc();
        Ok(NotificationOutcome::Created)
    }

    /// Filters one class listing against the ancestors admitted so far.
    fn admit_records(
        &self,
        next: &ResourceStore,
        descriptor: &ClassDescriptor,
        records: Vec<ResourceRecord>,
        report: &mut PopulateReport,
    ) -> Vec<ResourceRecord> {
        let mut admitted = Vec::with_capacity(records.len());
        for record in records {
            if record.class != descriptor.class {
                warn!(
                    "listing of {} returned {} {}, skipped",
                    descriptor.class, record.class, record.uri
                );
                continue;
            }
            if !record.accessible {
                self.report_once(&record.uri, || {
                    info!("{} {} is not accessible, treated as absent", record.class, record.uri)
                });
                admitted.push(record);
                continue;
            }
            if !next.has_accessible_ancestry(record.class, record.parent.as_ref()) {
                self.report_once(&record.uri, || {
                    warn!(
                        "{} {} excluded: ancestor missing or not accessible",
                        record.class, record.uri
                    )
                });
                report.excluded += 1;
                continue;
            }
            admitted.push(record);
        }
        admitted
    }

    /// Registers notification interest for every accessible record of a
    /// notification-capable class. Returns the per-URI outcome.
    async fn register_all(
        &self,
        descriptor: &ClassDescriptor,
        records: &[ResourceRecord],
    ) -> Result<BTreeMap<ResourceUri, bool>> {
        if !descriptor.notifications {
            return Ok(BTreeMap::new());
        }
        let targets: Vec<&ResourceUri> = records.iter().filter(|r| r.accessible).map(|r| &r.uri).collect();
        let outcomes = join_all(targets.iter().map(|uri| self.register(uri))).await;

        let mut subscribed = BTreeMap::new();
        for (uri, outcome) in targets.into_iter().zip(outcomes) {
            subscribed.insert(uri.clone(), outcome?);
        }
        Ok(subscribed)
    }

    /// `Ok(false)` when registration failed for a non-fatal reason.
    async fn register(
        &self,
        uri: &ResourceUri,
    ) -> Result<bool> {
        match self.client.register_interest(uri).await {
            Ok(()) => {
                self.subscriptions.insert(uri.clone());
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("notification registration for {} failed, excluded from auto-update: {}", uri, e);
                Ok(false)
            }
        }
    }

    /// Runs one mutation under the writer lock and publishes the result.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut ResourceStore) -> T,
    ) -> T {
        let _guard = self.writer.lock();
        let mut next = ResourceStore::clone(&self.current.load());
        let before = next.generation();
        let out = f(&mut next);
        if next.generation() != before {
            self.current.store(Arc::new(next));
        }
        out
    }

    /// Top-level resources are cached only for the configured systems.
    fn in_scope(
        &self,
        properties: &PropertyMap,
    ) -> bool {
        match properties.get("name") {
            Some(PropertyValue::Text(name)) => self.scope.includes(name),
            _ => self.scope.cpcs.is_empty(),
        }
    }

    fn report_once(
        &self,
        uri: &ResourceUri,
        log: impl FnOnce(),
    ) {
        if self.reported.insert(uri.clone()) {
            log();
        }
    }

    fn publish_gauges(&self) {
        let counts = self.current.load().count_by_class();
        for descriptor in self.dependencies.classes_in_order() {
            let count = counts.get(&descriptor.class).copied().unwrap_or(0);
            CACHED_RESOURCES
                .with_label_values(&[descriptor.class.as_str()])
                .set(count as i64);
        }
    }
}
