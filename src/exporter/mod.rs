//! Lifecycle wrapper owning every long-running component.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let settings = Settings::new()?.validate()?;
//! let mut exporter = ExporterBuilder::new(settings, client).build()?;
//! exporter.start().await?;
//! exporter.run(shutdown_rx).await?;
//! ```
//!
//! `start()` completes the initial population before anything is served.
//! `run()` returns on shutdown or on the first fatal error of any task.


use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::start_server;
use crate::utils::async_task::spawn_task;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::Collector;
use crate::ConsoleClient;
use crate::CyclePacer;
use crate::DependencyResolver;
use crate::DependencySet;
use crate::Error;
use crate::ExpressionRenderer;
use crate::FetchScheduler;
use crate::MetricRenderer;
use crate::NotificationListener;
use crate::NotificationMessage;
use crate::PopulateReport;
use crate::ResourceCache;
use crate::Result;
use crate::ScrapeTracker;
use crate::Settings;

pub struct ExporterBuilder {
    settings: Settings,
    client: Arc<dyn ConsoleClient>,
    renderer: Option<Arc<dyn MetricRenderer>>,
}

impl ExporterBuilder {
    pub fn new(
        settings: Settings,
        client: Arc<dyn ConsoleClient>,
    ) -> Self {
        Self {
            settings,
            client,
            renderer: None,
        }
    }

    /// Replaces the default [`ExpressionRenderer`].
    pub fn renderer(
        mut self,
        renderer: Arc<dyn MetricRenderer>,
    ) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Validates the settings and wires the components together. No console
    /// calls happen here.
    pub fn build(self) -> Result<Exporter> {
        let settings = Arc::new(self.settings.validate()?);

        let dependencies = Arc::new(DependencyResolver::new(&settings.metric_groups, &settings.resources).resolve());
        for disabled in dependencies.disabled_groups() {
            warn!("metric group '{}' will not be exported: {}", disabled.name, disabled.reason);
        }
        info!(
            "caching classes {:?}",
            dependencies.classes_in_order().iter().map(|d| d.class.as_str()).collect::<Vec<_>>()
        );

        let cache = Arc::new(ResourceCache::new(
            self.client.clone(),
            dependencies.clone(),
            settings.targets.scope(),
        ));
        let scrapes = Arc::new(ScrapeTracker::new());
        let renderer = self.renderer.unwrap_or_else(|| Arc::new(ExpressionRenderer::new()));
        let collector = Arc::new(Collector::new(
            self.client.clone(),
            cache.clone(),
            renderer,
            settings.retry.metric_service,
            scrapes.clone(),
        ));

        Ok(Exporter {
            settings,
            client: self.client,
            dependencies,
            cache,
            collector,
            scrapes,
            notifications: None,
        })
    }
}

pub struct Exporter {
    settings: Arc<Settings>,
    client: Arc<dyn ConsoleClient>,
    dependencies: Arc<DependencySet>,
    cache: Arc<ResourceCache>,
    collector: Arc<Collector>,
    scrapes: Arc<ScrapeTracker>,
    notifications: Option<mpsc::Receiver<NotificationMessage>>,
}

impl Exporter {
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn dependencies(&self) -> &Arc<DependencySet> {
        &self.dependencies
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Opens the notification channel and performs the initial population,
    /// retried under the `retry.populate` policy.
    pub async fn start(&mut self) -> Result<PopulateReport> {
        let client = &self.client;
        let cache = &self.cache;
        let attempt = || async move {
            let receiver = client.open_notifications().await?;
            let report = cache.populate().await?;
            Ok::<_, Error>((receiver, report))
        };

        let (receiver, report) = task_with_timeout_and_exponential_backoff(attempt, self.settings.retry.populate)
            .await
            .inspect_err(|e| error!("initial population failed: {}", e))?;
        self.notifications = Some(receiver);
        Ok(report)
    }

    /// Runs listener, scheduler and metrics endpoint until `shutdown_signal`
    /// fires or a task reports a fatal error, which is then returned.
    pub async fn run(
        mut self,
        mut shutdown_signal: watch::Receiver<()>,
    ) -> Result<()> {
        if self.notifications.is_none() {
            self.start().await?;
        }
        let receiver = self
            .notifications
            .take()
            .ok_or_else(|| Error::Fatal("notification channel missing after start".into()))?;

        let (stop_tx, stop_rx) = watch::channel(());
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<Error>(8);
        let mut handles = Vec::new();

        let listener = NotificationListener::new(self.client.clone(), self.cache.clone(), self.settings.retry.populate);
        let listener_stop = stop_rx.clone();
        spawn_task(
            "notification-listener",
            move || listener.run(receiver, listener_stop),
            Some(fatal_tx.clone()),
            &mut handles,
        );

        let scheduler = FetchScheduler::new(
            self.client.clone(),
            self.cache.clone(),
            self.scrapes.clone(),
            CyclePacer::new(&self.settings.fetch),
        );
        let scheduler_stop = stop_rx.clone();
        spawn_task(
            "fetch-scheduler",
            move || scheduler.run(scheduler_stop),
            Some(fatal_tx.clone()),
            &mut handles,
        );

        let addr = self.settings.server.socket_addr();
        let path = self.settings.server.metrics_path.clone();
        let collector = self.collector.clone();
        let server_fatal_tx = fatal_tx.clone();
        let server_stop = stop_rx;
        spawn_task(
            "metrics-server",
            move || async move {
                start_server(addr, path, collector, server_fatal_tx, server_stop)
                    .await
                    .map_err(|e| Error::Fatal(e.to_string()))
            },
            Some(fatal_tx),
            &mut handles,
        );

        let outcome = tokio::select! {
            _ = shutdown_signal.changed() => {
                info!("shutdown requested");
                Ok(())
            }
            Some(e) = fatal_rx.recv() => {
                error!("terminating on fatal error: {}", e);
                Err(e)
            }
        };

        if stop_tx.send(()).is_err() {
            warn!("all tasks already stopped");
        }
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("task panicked or was cancelled: {:?}", e);
            }
        }
        info!("exporter stopped");
        outcome
    }
}
