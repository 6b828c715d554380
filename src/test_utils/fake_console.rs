use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::constants::NOTIFICATION_CHANNEL_CAPACITY;
use crate::ChangeEvent;
use crate::ConsoleClient;
use crate::ConsoleError;
use crate::ConsoleResult;
use crate::MetricSample;
use crate::NotificationMessage;
use crate::PropertyMap;
use crate::PropertyValue;
use crate::ResourceClass;
use crate::ResourceRecord;
use crate::ResourceUri;
use crate::TargetScope;

#[derive(Default)]
struct FakeState {
    records: BTreeMap<ResourceUri, ResourceRecord>,
    denied_registrations: BTreeSet<ResourceUri>,
    denied_listings: BTreeSet<ResourceClass>,
    registered: BTreeSet<ResourceUri>,
    samples: Vec<MetricSample>,
    metric_failures: usize,
    poll_failures: usize,
    fetch_failures: usize,
    held_listings: BTreeMap<ResourceClass, Arc<Notify>>,
    credentials_rejected: bool,
}

#[derive(Default)]
pub struct FakeCalls {
    pub list: AtomicUsize,
    pub fetch: AtomicUsize,
    pub poll: AtomicUsize,
    pub open: AtomicUsize,
    pub close: AtomicUsize,
    pub metrics: AtomicUsize,
}

/// In-memory console holding a resource tree. Listings, polls and property
/// fetches read whatever the tree holds at call time.
#[derive(Default)]
pub struct FakeConsole {
    state: Mutex<FakeState>,
    notifier: Mutex<Option<mpsc::Sender<NotificationMessage>>>,
    pub calls: FakeCalls,
}

impl FakeConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ResourceRecord>) -> Self {
        let console = Self::new();
        for record in records {
            console.add(record);
        }
        console
    }

    pub fn add(
        &self,
        record: ResourceRecord,
    ) {
        self.state.lock().records.insert(record.uri.clone(), record);
    }

    pub fn remove(
        &self,
        uri: &ResourceUri,
    ) {
        self.state.lock().records.remove(uri);
    }

    pub fn set_property(
        &self,
        uri: &ResourceUri,
        name: &str,
        value: impl Into<PropertyValue>,
    ) {
        if let Some(record) = self.state.lock().records.get_mut(uri) {
            record.properties.insert(name.to_string(), value.into());
        }
    }

    pub fn deny_registration(
        &self,
        uri: &ResourceUri,
    ) {
        self.state.lock().denied_registrations.insert(uri.clone());
    }

    pub fn deny_listing(
        &self,
        class: ResourceClass,
    ) {
        self.state.lock().denied_listings.insert(class);
    }

    pub fn set_samples(
        &self,
        samples: Vec<MetricSample>,
    ) {
        self.state.lock().samples = samples;
    }

    /// The next `n` metric service requests fail with a connection error.
    pub fn fail_metric_fetches(
        &self,
        n: usize,
    ) {
        self.state.lock().metric_failures = n;
    }

    /// The next `n` poll requests time out.
    pub fn fail_polls(
        &self,
        n: usize,
    ) {
        self.state.lock().poll_failures = n;
    }

    /// The next `n` property fetches fail with a connection error.
    pub fn fail_fetches(
        &self,
        n: usize,
    ) {
        self.state.lock().fetch_failures = n;
    }

    /// The next listing of `class` waits until the returned handle is
    /// notified. The call is counted before it waits.
    pub fn hold_listing(
        &self,
        class: ResourceClass,
    ) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().held_listings.insert(class, gate.clone());
        gate
    }

    /// Every following call fails with an authentication error.
    pub fn reject_credentials(&self) {
        self.state.lock().credentials_rejected = true;
    }

    pub fn is_registered(
        &self,
        uri: &ResourceUri,
    ) -> bool {
        self.state.lock().registered.contains(uri)
    }

    /// Delivers a change on the open channel. `false` when no channel is open.
    pub async fn push(
        &self,
        event: ChangeEvent,
    ) -> bool {
        let sender = self.notifier.lock().clone();
        match sender {
            Some(tx) => tx.send(NotificationMessage::Change(event)).await.is_ok(),
            None => false,
        }
    }

    /// Emits a disconnect marker and drops the channel, voiding every
    /// subscription.
    pub async fn disconnect(
        &self,
        reason: &str,
    ) {
        let sender = self.notifier.lock().take();
        self.state.lock().registered.clear();
        if let Some(tx) = sender {
            let _ = tx.send(NotificationMessage::Disconnected(reason.to_string())).await;
        }
    }

    fn check_credentials(&self) -> ConsoleResult<()> {
        if self.state.lock().credentials_rejected {
            return Err(ConsoleError::Authentication("password expired".into()));
        }
        Ok(())
    }
}

fn in_scope(
    records: &BTreeMap<ResourceUri, ResourceRecord>,
    record: &ResourceRecord,
    scope: &TargetScope,
) -> bool {
    let mut current = record;
    while let Some(parent) = current.parent.as_ref().and_then(|p| records.get(p)) {
        current = parent;
    }
    match current.properties.get("name") {
        Some(PropertyValue::Text(cpc)) if current.class == ResourceClass::Cpc => scope.includes(cpc),
        _ => true,
    }
}

fn subset(
    properties: &PropertyMap,
    names: &[String],
) -> PropertyMap {
    names
        .iter()
        .filter_map(|n| properties.get(n).map(|v| (n.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl ConsoleClient for FakeConsole {
    async fn list_resources(
        &self,
        class: ResourceClass,
        scope: &TargetScope,
    ) -> ConsoleResult<Vec<ResourceRecord>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;
        let held = self.state.lock().held_listings.remove(&class);
        if let Some(gate) = held {
            gate.notified().await;
        }
        let state = self.state.lock();
        if state.denied_listings.contains(&class) {
            return Err(ConsoleError::PermissionDenied {
                uri: format!("/api/{class}"),
            });
        }
        Ok(state
            .records
            .values()
            .filter(|r| r.class == class && in_scope(&state.records, r, scope))
            .cloned()
            .collect())
    }

    async fn fetch_properties(
        &self,
        uri: &ResourceUri,
        names: &[String],
    ) -> ConsoleResult<PropertyMap> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;
        let mut state = self.state.lock();
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(ConsoleError::Connection("connection reset".into()));
        }
        match state.records.get(uri) {
            None => Err(ConsoleError::NotFound { uri: uri.to_string() }),
            Some(r) if !r.accessible => Err(ConsoleError::PermissionDenied { uri: uri.to_string() }),
            Some(r) => Ok(subset(&r.properties, names)),
        }
    }

    async fn poll_properties(
        &self,
        class: ResourceClass,
        scope: &TargetScope,
        names: &[String],
    ) -> ConsoleResult<Vec<(ResourceUri, PropertyMap)>> {
        self.calls.poll.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;
        let mut state = self.state.lock();
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(ConsoleError::Timeout(Duration::from_secs(10)));
        }
        Ok(state
            .records
            .values()
            .filter(|r| r.class == class && r.accessible && in_scope(&state.records, r, scope))
            .map(|r| (r.uri.clone(), subset(&r.properties, names)))
            .collect())
    }

    async fn register_interest(
        &self,
        uri: &ResourceUri,
    ) -> ConsoleResult<()> {
        self.check_credentials()?;
        let mut state = self.state.lock();
        if state.denied_registrations.contains(uri) {
            return Err(ConsoleError::PermissionDenied { uri: uri.to_string() });
        }
        state.registered.insert(uri.clone());
        Ok(())
    }

    async fn open_notifications(&self) -> ConsoleResult<mpsc::Receiver<NotificationMessage>> {
        self.calls.open.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        *self.notifier.lock() = Some(tx);
        Ok(rx)
    }

    async fn close_notifications(&self) -> ConsoleResult<()> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        self.notifier.lock().take();
        self.state.lock().registered.clear();
        Ok(())
    }

    async fn fetch_metric_values(
        &self,
        groups: &[String],
    ) -> ConsoleResult<Vec<MetricSample>> {
        self.calls.metrics.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;
        let mut state = self.state.lock();
        if state.metric_failures > 0 {
            state.metric_failures -= 1;
            return Err(ConsoleError::Connection("metrics context unavailable".into()));
        }
        Ok(state
            .samples
            .iter()
            .filter(|s| groups.contains(&s.group))
            .cloned()
            .collect())
    }
}
