//! Per-scrape assembly of metric records.
//!
//! A scrape fetches metric service values (bounded retry), takes exactly one
//! cache snapshot and renders every enabled group against it. The collector
//! never writes to the cache.

mod render;
pub use render::*;


use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::metrics::METRIC_SERVICE_FAILURES;
use crate::metrics::RENDER_ERRORS;
use crate::metrics::SCRAPE_DURATION;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::ConsoleClient;
use crate::DependencySet;
use crate::Error;
use crate::MetricGroupConfig;
use crate::MetricKind;
use crate::MetricSample;
use crate::RenderError;
use crate::ResourceCache;
use crate::Result;
use crate::Snapshot;

/// One exported sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Remembers when scrapes happen so the fetch pacing can follow them.
#[derive(Debug, Default)]
pub struct ScrapeTracker {
    inner: Mutex<ScrapeTimes>,
}

#[derive(Debug, Default)]
struct ScrapeTimes {
    last: Option<Instant>,
    interval: Option<Duration>,
}

impl ScrapeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        let now = Instant::now();
        let mut times = self.inner.lock();
        if let Some(last) = times.last {
            times.interval = Some(now.saturating_duration_since(last));
        }
        times.last = Some(now);
    }

    /// Time between the two most recent scrapes.
    pub fn interval(&self) -> Option<Duration> {
        self.inner.lock().interval
    }
}

pub struct Collector {
    client: Arc<dyn ConsoleClient>,
    cache: Arc<ResourceCache>,
    dependencies: Arc<DependencySet>,
    renderer: Arc<dyn MetricRenderer>,
    retry: BackoffPolicy,
    scrapes: Arc<ScrapeTracker>,
}

impl Collector {
    pub fn new(
        client: Arc<dyn ConsoleClient>,
        cache: Arc<ResourceCache>,
        renderer: Arc<dyn MetricRenderer>,
        retry: BackoffPolicy,
        scrapes: Arc<ScrapeTracker>,
    ) -> Self {
        let dependencies = cache.dependencies().clone();
        Self {
            client,
            cache,
            dependencies,
            renderer,
            retry,
            scrapes,
        }
    }

    pub fn scrapes(&self) -> &Arc<ScrapeTracker> {
        &self.scrapes
    }

    /// Records for one scrape.
    ///
    /// # Errors
    /// Only fatal conditions (rejected credentials) are returned. Transient
    /// metric service failures drop those records from this scrape.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Result<Vec<MetricRecord>> {
        self.scrapes.record();
        let timer = SCRAPE_DURATION.start_timer();

        let samples = self.fetch_samples().await?;
        let snapshot = self.cache.snapshot();

        let mut records = Vec::new();
        self.render_samples(&snapshot, &samples, &mut records);
        self.render_resources(&snapshot, &mut records);

        timer.observe_duration();
        debug!(
            "scrape rendered {} records from {} samples at generation {}",
            records.len(),
            samples.len(),
            snapshot.generation()
        );
        Ok(records)
    }

    async fn fetch_samples(&self) -> Result<Vec<MetricSample>> {
        let groups: Vec<String> = self
            .dependencies
            .metric_service_groups()
            .map(|g| g.config.service_group().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let client = &self.client;
        let requested = &groups;
        let fetch = || async move { client.fetch_metric_values(requested).await.map_err(Error::from) };

        match task_with_timeout_and_exponential_backoff(fetch, self.retry).await {
            Ok(samples) => Ok(samples),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                METRIC_SERVICE_FAILURES.inc();
                warn!("metric service values omitted from this scrape: {}", e);
                Ok(Vec::new())
            }
        }
    }

    fn render_samples(
        &self,
        snapshot: &Snapshot,
        samples: &[MetricSample],
        records: &mut Vec<MetricRecord>,
    ) {
        for group in self.dependencies.metric_service_groups() {
            let service_group = group.config.service_group();
            for sample in samples.iter().filter(|s| s.group == service_group) {
                let resource = sample.resource.as_ref().and_then(|uri| snapshot.get(uri));
                if let (Some(class), Some(uri)) = (group.class, &sample.resource) {
                    if resource.map(|r| r.class) != Some(class) {
                        debug!("sample of {} skipped, resource not cached", uri);
                        continue;
                    }
                }
                let scope = RenderScope::for_sample(snapshot, sample, resource);
                self.render_group(&group.config, &scope, records);
            }
        }
    }

    fn render_resources(
        &self,
        snapshot: &Snapshot,
        records: &mut Vec<MetricRecord>,
    ) {
        for group in self.dependencies.resource_groups() {
            let Some(class) = group.class else {
                continue;
            };
            for resource in snapshot.resources_of(class) {
                let scope = RenderScope::for_resource(snapshot, resource);
                self.render_group(&group.config, &scope, records);
            }
        }
    }

    /// A failed label drops this group's records for the current resource; a
    /// failed value drops only that metric.
    fn render_group(
        &self,
        group: &MetricGroupConfig,
        scope: &RenderScope<'_>,
        records: &mut Vec<MetricRecord>,
    ) {
        let mut labels = Vec::with_capacity(group.labels.len());
        for label in &group.labels {
            match self.renderer.label(&label.value, scope) {
                Ok(value) => labels.push((label.name.clone(), value)),
                Err(e) => {
                    report_render_error(&group.name, &e);
                    return;
                }
            }
        }

        for metric in &group.metrics {
            match self.renderer.value(metric, scope) {
                Ok(Some(value)) => records.push(MetricRecord {
                    name: metric.name.clone(),
                    help: metric.help.clone(),
                    kind: metric.kind,
                    labels: labels.clone(),
                    value,
                }),
                Ok(None) => {}
                Err(e) => report_render_error(&group.name, &e),
            }
        }
    }
}

fn report_render_error(
    group: &str,
    error: &RenderError,
) {
    RENDER_ERRORS.with_label_values(&[group]).inc();
    match error {
        RenderError::MissingProperty { .. } | RenderError::MissingParent { .. } => {
            debug!("metric group '{}': {}", group, error)
        }
        _ => warn!("metric group '{}': {}", group, error),
    }
}
