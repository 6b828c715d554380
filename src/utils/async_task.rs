use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, each attempt bounded by the policy timeout.
///
/// The delay between attempts doubles from `base_delay` up to `max_delay`.
/// Errors that are not retryable, fatal ones included, end the loop at once
/// and are returned unchanged.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut retries = 0;
    let mut delay = policy.base_delay();
    let mut last = Error::RetryTaskFailed("task was never attempted".to_string());

    while retries < policy.max_retries {
        match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => {
                warn!("attempt {} failed: {}", retries + 1, e);
                last = e;
            }
            Err(_) => {
                warn!("attempt {} timed out after {:?}", retries + 1, policy.timeout());
                last = Error::RetryTimeoutError(policy.timeout());
            }
        }

        retries += 1;
        if retries < policy.max_retries {
            sleep(delay).await;
            delay = (delay * 2).min(policy.max_delay());
        }
    }

    warn!("task failed after {} attempts", retries);
    Err(Error::RetryTaskFailed(last.to_string()))
}

/// Spawns a long-running task and tracks its handle.
///
/// A task ending in a fatal error forwards it on `fatal_tx` so the owner can
/// shut everything down.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    fatal_tx: Option<mpsc::Sender<Error>>,
    handles: &mut Vec<JoinHandle<()>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped with an error: {}", e);
            if e.is_fatal() {
                if let Some(tx) = fatal_tx {
                    if tx.send(e).await.is_err() {
                        warn!("fatal error of {name} dropped, exporter already stopping");
                    }
                }
            }
        }
    });
    handles.push(handle);
}
