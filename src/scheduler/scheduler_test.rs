use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::*;
use crate::test_utils::adapter;
use crate::test_utils::cpc;
use crate::test_utils::dependencies;
use crate::test_utils::network_port;
use crate::test_utils::partition;
use crate::test_utils::resource_group;
use crate::test_utils::FakeConsole;
use crate::ConsoleError;
use crate::DependencyResolver;
use crate::FetchConfig;
use crate::MockConsoleClient;
use crate::PropertyValue;
use crate::ResourceClass;
use crate::ResourceClassConfig;
use crate::ResourcesConfig;
use crate::TargetScope;

fn port_console() -> Arc<FakeConsole> {
    Arc::new(FakeConsole::with_records([
        cpc("CPCA"),
        adapter("CPCA", "OSA1"),
        network_port("CPCA", "OSA1", 0).with_property("description", "uplink"),
    ]))
}

async fn scheduler_over(
    client: Arc<dyn ConsoleClient>,
    dependencies: Arc<crate::DependencySet>,
) -> (FetchScheduler, Arc<ResourceCache>) {
    let cache = Arc::new(ResourceCache::new(client.clone(), dependencies, TargetScope::default()));
    cache.populate().await.unwrap();
    let scheduler = FetchScheduler::new(
        client,
        cache.clone(),
        Arc::new(ScrapeTracker::new()),
        CyclePacer::new(&FetchConfig::default()),
    );
    (scheduler, cache)
}

fn port_dependencies() -> Arc<crate::DependencySet> {
    dependencies(&[resource_group("port-props", "network-port", &[("zhmc_port_info", "description")])])
}

#[tokio::test]
async fn cycle_applies_polled_properties() {
    let console = port_console();
    let (scheduler, cache) = scheduler_over(console.clone(), port_dependencies()).await;
    let port = network_port("CPCA", "OSA1", 0).uri;
    console.set_property(&port, "description", "backup link");

    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(
        cache.snapshot().get(&port).unwrap().property("description"),
        Some(&PropertyValue::from("backup link"))
    );
    assert_eq!(console.calls.poll.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resources_without_notifications_are_refreshed_individually() {
    let console = Arc::new(FakeConsole::with_records([
        cpc("CPCA"),
        partition("CPCA", "PART1").with_property("ifl-processors", 2_i64),
        partition("CPCA", "PART2").with_property("ifl-processors", 2_i64),
    ]));
    let part1 = partition("CPCA", "PART1").uri;
    let part2 = partition("CPCA", "PART2").uri;
    console.deny_registration(&part2);

    let groups = [resource_group("partition-props", "partition", &[("ifl", "ifl-processors")])];
    let mut resources = ResourcesConfig::default();
    resources.classes.insert(
        "partition".into(),
        ResourceClassConfig {
            notifications: None,
            poll_properties: Some(vec!["status".into()]),
        },
    );
    let deps = Arc::new(DependencyResolver::new(&groups, &resources).resolve());
    let (scheduler, cache) = scheduler_over(console.clone(), deps).await;

    console.set_property(&part1, "ifl-processors", 8_i64);
    console.set_property(&part2, "ifl-processors", 8_i64);
    console.set_property(&part2, "status", "active");

    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.refreshed, 1);
    let snapshot = cache.snapshot();
    // PART1 is notification driven; only its poll property is refreshed
    assert_eq!(snapshot.get(&part1).unwrap().property("ifl-processors"), Some(&PropertyValue::Int(2)));
    assert_eq!(snapshot.get(&part2).unwrap().property("ifl-processors"), Some(&PropertyValue::Int(8)));
    assert_eq!(snapshot.get(&part2).unwrap().property("status"), Some(&PropertyValue::from("active")));
}

#[tokio::test]
async fn failed_cycle_is_reported_and_next_cycle_recovers() {
    let console = port_console();
    let (scheduler, _) = scheduler_over(console.clone(), port_dependencies()).await;
    console.fail_polls(1);

    let failed = scheduler.run_cycle().await;
    assert!(failed.as_ref().is_err_and(|e| !e.is_fatal()));

    let recovered = scheduler.run_cycle().await.unwrap();
    assert_eq!(recovered.applied, 1);
}

#[tokio::test]
async fn polls_for_removed_resources_are_discarded() {
    let console = port_console();
    let (scheduler, cache) = scheduler_over(console.clone(), port_dependencies()).await;
    let port = network_port("CPCA", "OSA1", 0).uri;
    cache
        .apply_notification(crate::ChangeEvent::delete(adapter("CPCA", "OSA1").uri, ResourceClass::Adapter))
        .await
        .unwrap();

    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.applied, 0);
    assert!(!cache.snapshot().contains(&port));
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_stops_the_scheduler() {
    let mut mock = MockConsoleClient::new();
    mock.expect_list_resources().returning(|class, _| {
        Ok(match class {
            ResourceClass::Cpc => vec![cpc("CPCA")],
            ResourceClass::Adapter => vec![adapter("CPCA", "OSA1")],
            _ => vec![network_port("CPCA", "OSA1", 0)],
        })
    });
    mock.expect_register_interest().returning(|_| Ok(()));
    mock.expect_poll_properties()
        .times(1)
        .returning(|_, _, _| Err(ConsoleError::Authentication("password expired".into())));
    let (scheduler, _) = scheduler_over(Arc::new(mock), port_dependencies()).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let result = scheduler.run(shutdown_rx).await;

    assert!(matches!(result, Err(Error::Fatal(_))));
}

#[tokio::test(start_paused = true)]
async fn run_cycles_until_shutdown() {
    let console = port_console();
    let (scheduler, _) = scheduler_over(console.clone(), port_dependencies()).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(console.calls.poll.load(Ordering::SeqCst), 1);

    shutdown_tx.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());
    assert_eq!(console.calls.poll.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_without_poll_eligible_classes() {
    let console = Arc::new(FakeConsole::with_records([cpc("CPCA")]));
    let deps = dependencies(&[resource_group("cpc-props", "cpc", &[("x", "x")])]);
    let (scheduler, _) = scheduler_over(console.clone(), deps).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    tokio::time::sleep(Duration::from_secs(300)).await;
    shutdown_tx.send(()).unwrap();

    assert!(handle.await.unwrap().is_ok());
    assert_eq!(console.calls.poll.load(Ordering::SeqCst), 0);
}
