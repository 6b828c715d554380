//! Background property polling for classes without (reliable) change
//! notifications.

mod pacer;
pub use pacer::*;

#[cfg(test)]
mod scheduler_test;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::metrics::FETCH_CYCLE;
use crate::metrics::FETCH_FAILURES;
use crate::ConsoleClient;
use crate::Error;
use crate::ResourceCache;
use crate::Result;
use crate::ScrapeTracker;

/// Counts of one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Poll results merged into the cache
    pub applied: usize,
    /// Resources refreshed individually because they get no notifications
    pub refreshed: usize,
    /// Resources skipped on permission or not-found errors
    pub skipped: usize,
}

pub struct FetchScheduler {
    client: Arc<dyn ConsoleClient>,
    cache: Arc<ResourceCache>,
    scrapes: Arc<ScrapeTracker>,
    pacer: CyclePacer,
}

impl FetchScheduler {
    pub fn new(
        client: Arc<dyn ConsoleClient>,
        cache: Arc<ResourceCache>,
        scrapes: Arc<ScrapeTracker>,
        pacer: CyclePacer,
    ) -> Self {
        Self {
            client,
            cache,
            scrapes,
            pacer,
        }
    }

    pub fn pacer(&self) -> &CyclePacer {
        &self.pacer
    }

    /// Sleeps one cycle, fetches, adjusts the cycle to the scrape interval and
    /// repeats until shutdown. Only fatal errors end the loop early.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut shutdown_signal: watch::Receiver<()>,
    ) -> Result<()> {
        if self.cache.dependencies().poll_eligible().is_empty() {
            info!("no poll-eligible classes, fetch scheduler idle");
            let _ = shutdown_signal.changed().await;
            return Ok(());
        }

        loop {
            FETCH_CYCLE.set(self.pacer.current().as_secs_f64());
            tokio::select! {
                _ = shutdown_signal.changed() => {
                    info!("fetch scheduler shutting down");
                    return Ok(());
                }
                _ = sleep(self.pacer.current()) => {}
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                _ = shutdown_signal.changed() => {
                    info!("fetch scheduler shutting down mid-cycle");
                    return Ok(());
                }
                outcome = self.run_cycle() => outcome,
            };
            match outcome {
                Ok(report) => debug!("fetch cycle done in {:?}: {:?}", started.elapsed(), report),
                Err(e) if e.is_fatal() => {
                    error!("fetch cycle hit a fatal error: {}", e);
                    return Err(Error::Fatal(format!("background fetch: {e}")));
                }
                Err(e) => warn!("fetch cycle skipped: {}", e),
            }

            let previous = self.pacer.current();
            let current = self.pacer.adjust(self.scrapes.interval());
            if current != previous {
                info!("fetch cycle adjusted from {:?} to {:?}", previous, current);
            }
        }
    }

    /// One pass over every poll-eligible class.
    ///
    /// # Errors
    /// A failed class poll aborts the cycle; permission and not-found errors
    /// of single resources are skipped.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let dependencies = self.cache.dependencies().clone();

        for descriptor in dependencies.poll_eligible() {
            let class = descriptor.class;
            let results = self
                .client
                .poll_properties(class, self.cache.scope(), &descriptor.poll_properties)
                .await
                .inspect_err(|_| FETCH_FAILURES.with_label_values(&[class.as_str()]).inc())?;
            for (uri, properties) in results {
                if self.cache.apply_poll_result(class, &uri, properties).await {
                    report.applied += 1;
                }
            }

            if !descriptor.notifications {
                continue;
            }
            // Only reached when a class override makes a poll-eligible class
            // notification-capable; no built-in class is both. Refreshes the
            // resources whose registration failed.
            let mut names = descriptor.poll_properties.clone();
            if let Some(entry) = dependencies.entry(class) {
                for property in &entry.metric_properties {
                    if !names.contains(property) {
                        names.push(property.clone());
                    }
                }
            }
            let orphans: Vec<_> = self
                .cache
                .snapshot()
                .without_notifications(class)
                .into_iter()
                .map(|r| r.uri.clone())
                .collect();
            for uri in orphans {
                match self.client.fetch_properties(&uri, &names).await {
                    Ok(properties) => {
                        if self.cache.apply_poll_result(class, &uri, properties).await {
                            report.refreshed += 1;
                        }
                    }
                    Err(e) if e.is_access_gap() => {
                        debug!("{} skipped this cycle: {}", uri, e);
                        report.skipped += 1;
                    }
                    Err(e) => {
                        FETCH_FAILURES.with_label_values(&[class.as_str()]).inc();
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(report)
    }
}
