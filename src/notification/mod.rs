//! Bridges the console's push channel to the cache.
//!
//! A disconnect voids every subscription. The listener then opens a fresh
//! channel first and re-populates second, so changes arriving during the
//! re-population queue up and are applied after the new store is swapped in.

#[cfg(test)]
mod listener_test;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::metrics::REPOPULATIONS;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::ConsoleClient;
use crate::Error;
use crate::NotificationMessage;
use crate::ResourceCache;
use crate::Result;

pub struct NotificationListener {
    client: Arc<dyn ConsoleClient>,
    cache: Arc<ResourceCache>,
    resync_policy: BackoffPolicy,
}

impl NotificationListener {
    pub fn new(
        client: Arc<dyn ConsoleClient>,
        cache: Arc<ResourceCache>,
        resync_policy: BackoffPolicy,
    ) -> Self {
        Self {
            client,
            cache,
            resync_policy,
        }
    }

    /// Applies pushed changes until shutdown, resynchronizing after every
    /// disconnect. Returns an error only for fatal conditions.
    #[instrument(skip_all)]
    pub async fn run(
        self,
        mut receiver: mpsc::Receiver<NotificationMessage>,
        mut shutdown_signal: watch::Receiver<()>,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = shutdown_signal.changed() => {
                    self.close().await;
                    return Ok(());
                }
                message = receiver.recv() => message,
            };

            let reason = match message {
                Some(NotificationMessage::Change(event)) => {
                    let uri = event.uri.clone();
                    match self.cache.apply_notification(event).await {
                        Ok(outcome) => debug!("{}: {:?}", uri, outcome),
                        Err(e) if e.is_fatal() => {
                            error!("notification for {} hit a fatal error: {}", uri, e);
                            return Err(e);
                        }
                        Err(e) => warn!("notification for {} not applied: {}", uri, e),
                    }
                    continue;
                }
                Some(NotificationMessage::Disconnected(reason)) => reason,
                None => "notification channel closed".to_string(),
            };

            warn!("notifications lost ({}), re-populating the cache", reason);
            match self.resync(&mut shutdown_signal).await? {
                Some(fresh) => receiver = fresh,
                None => return Ok(()),
            }
        }
    }

    /// Reopens the channel and re-populates, retrying until it works or
    /// shutdown is requested (`Ok(None)`).
    async fn resync(
        &self,
        shutdown_signal: &mut watch::Receiver<()>,
    ) -> Result<Option<mpsc::Receiver<NotificationMessage>>> {
        self.cache.invalidate_subscriptions();
        REPOPULATIONS.inc();

        let client = &self.client;
        let cache = &self.cache;
        let attempt = || async move {
            let receiver = client.open_notifications().await?;
            cache.populate().await?;
            Ok::<_, Error>(receiver)
        };

        loop {
            let outcome = tokio::select! {
                _ = shutdown_signal.changed() => {
                    self.close().await;
                    return Ok(None);
                }
                outcome = task_with_timeout_and_exponential_backoff(attempt, self.resync_policy) => outcome,
            };
            match outcome {
                Ok(receiver) => {
                    info!("notification channel reopened, cache re-populated");
                    return Ok(Some(receiver));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("re-population failed, retrying: {}", e);
                    tokio::select! {
                        _ = shutdown_signal.changed() => {
                            self.close().await;
                            return Ok(None);
                        }
                        _ = sleep(self.resync_policy.max_delay()) => {}
                    }
                }
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.client.close_notifications().await {
            warn!("closing notifications failed: {}", e);
        }
        self.cache.invalidate_subscriptions();
        info!("notification listener stopped");
    }
}
