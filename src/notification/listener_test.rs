use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;

use super::*;
use crate::test_utils::cpc;
use crate::test_utils::dependencies;
use crate::test_utils::partition;
use crate::test_utils::resource_group;
use crate::test_utils::wait_until;
use crate::test_utils::FakeConsole;
use crate::ChangeEvent;
use crate::ResourceClass;
use crate::TargetScope;

fn quick_resync() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        timeout_ms: 1_000,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

struct Harness {
    console: Arc<FakeConsole>,
    cache: Arc<ResourceCache>,
    shutdown_tx: watch::Sender<()>,
    handle: tokio::task::JoinHandle<Result<()>>,
}

async fn start(console: Arc<FakeConsole>) -> Harness {
    let cache = Arc::new(ResourceCache::new(
        console.clone(),
        dependencies(&[resource_group("partition-props", "partition", &[("ifl", "ifl-processors")])]),
        TargetScope::default(),
    ));
    let receiver = console.open_notifications().await.unwrap();
    cache.populate().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let listener = NotificationListener::new(console.clone(), cache.clone(), quick_resync());
    let handle = tokio::spawn(listener.run(receiver, shutdown_rx));
    Harness {
        console,
        cache,
        shutdown_tx,
        handle,
    }
}

fn two_partitions() -> Arc<FakeConsole> {
    Arc::new(FakeConsole::with_records([
        cpc("CPCA"),
        partition("CPCA", "PART1"),
        partition("CPCA", "PART2"),
    ]))
}

#[tokio::test]
async fn pushed_changes_reach_the_cache() {
    let h = start(two_partitions()).await;
    let part1 = partition("CPCA", "PART1").uri;

    assert!(h.console.push(ChangeEvent::delete(part1.clone(), ResourceClass::Partition)).await);

    assert!(wait_until(|| !h.cache.snapshot().contains(&part1)).await);
    assert!(h.cache.snapshot().contains(&partition("CPCA", "PART2").uri));

    h.shutdown_tx.send(()).unwrap();
    assert!(h.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn shutdown_unsubscribes() {
    let h = start(two_partitions()).await;
    assert_eq!(h.cache.subscription_count(), 3);

    h.shutdown_tx.send(()).unwrap();
    assert!(h.handle.await.unwrap().is_ok());

    assert_eq!(h.console.calls.close.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.subscription_count(), 0);
    assert!(!h.console.is_registered(&cpc("CPCA").uri));
}

#[tokio::test]
async fn disconnect_triggers_full_repopulation() {
    let h = start(two_partitions()).await;
    let part1 = partition("CPCA", "PART1").uri;
    let part3 = partition("CPCA", "PART3");
    let before = h.cache.snapshot().generation();

    // changes missed while the transport was down
    h.console.remove(&part1);
    h.console.add(part3.clone());
    h.console.disconnect("connection reset").await;

    assert!(wait_until(|| h.cache.snapshot().contains(&part3.uri)).await);
    let snapshot = h.cache.snapshot();
    assert!(!snapshot.contains(&part1));
    assert!(snapshot.generation() > before);
    assert_eq!(h.console.calls.open.load(Ordering::SeqCst), 2);
    assert!(h.console.is_registered(&part3.uri));

    // the fresh channel is live
    let part2 = partition("CPCA", "PART2").uri;
    assert!(h.console.push(ChangeEvent::delete(part2.clone(), ResourceClass::Partition)).await);
    assert!(wait_until(|| !h.cache.snapshot().contains(&part2)).await);

    h.shutdown_tx.send(()).unwrap();
    assert!(h.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn closed_channel_is_treated_as_disconnect() {
    let h = start(two_partitions()).await;

    h.console.close_notifications().await.unwrap();

    assert!(wait_until(|| h.console.calls.open.load(Ordering::SeqCst) == 2).await);
    assert!(wait_until(|| h.cache.subscription_count() == 3).await);

    h.shutdown_tx.send(()).unwrap();
    assert!(h.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn rejected_credentials_during_resync_are_fatal() {
    let h = start(two_partitions()).await;

    h.console.reject_credentials();
    h.console.disconnect("session expired").await;

    let result = h.handle.await.unwrap();
    assert!(result.is_err_and(|e| e.is_fatal()));
}
