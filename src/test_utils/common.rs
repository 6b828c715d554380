use std::sync::Arc;

use crate::DependencyResolver;
use crate::DependencySet;
use crate::GroupKind;
use crate::LabelDefinition;
use crate::MetricDefinition;
use crate::MetricGroupConfig;
use crate::ResourceClass;
use crate::ResourceRecord;
use crate::ResourceUri;
use crate::ResourcesConfig;

pub fn cpc_uri(name: &str) -> ResourceUri {
    ResourceUri::new(format!("/api/cpcs/{name}"))
}

pub fn cpc(name: &str) -> ResourceRecord {
    ResourceRecord::new(cpc_uri(name), ResourceClass::Cpc, None).with_property("name", name)
}

pub fn partition(
    cpc_name: &str,
    name: &str,
) -> ResourceRecord {
    ResourceRecord::new(
        format!("/api/partitions/{cpc_name}.{name}"),
        ResourceClass::Partition,
        Some(cpc_uri(cpc_name)),
    )
    .with_property("name", name)
}

pub fn adapter(
    cpc_name: &str,
    name: &str,
) -> ResourceRecord {
    ResourceRecord::new(
        format!("/api/adapters/{cpc_name}.{name}"),
        ResourceClass::Adapter,
        Some(cpc_uri(cpc_name)),
    )
    .with_property("name", name)
}

pub fn network_port(
    cpc_name: &str,
    adapter_name: &str,
    index: u32,
) -> ResourceRecord {
    let parent = adapter(cpc_name, adapter_name).uri;
    ResourceRecord::new(
        format!("{parent}/network-ports/{index}"),
        ResourceClass::NetworkPort,
        Some(parent),
    )
    .with_property("name", format!("port{index}"))
}

pub fn metric(
    name: &str,
    source: &str,
) -> MetricDefinition {
    MetricDefinition {
        name: name.to_string(),
        help: format!("{name} help"),
        kind: Default::default(),
        source: source.to_string(),
        percent: false,
        value_map: Default::default(),
    }
}

pub fn label(
    name: &str,
    value: &str,
) -> LabelDefinition {
    LabelDefinition {
        name: name.to_string(),
        value: value.to_string(),
    }
}

pub fn resource_group(
    name: &str,
    class: &str,
    metrics: &[(&str, &str)],
) -> MetricGroupConfig {
    MetricGroupConfig {
        name: name.to_string(),
        kind: GroupKind::ResourceProperty,
        resource_class: Some(class.to_string()),
        metric_service_group: None,
        enabled: true,
        labels: Vec::new(),
        metrics: metrics.iter().map(|(n, s)| metric(n, s)).collect(),
    }
}

pub fn metric_service_group(
    name: &str,
    class: Option<&str>,
    metrics: &[(&str, &str)],
) -> MetricGroupConfig {
    MetricGroupConfig {
        name: name.to_string(),
        kind: GroupKind::MetricService,
        resource_class: class.map(str::to_string),
        metric_service_group: None,
        enabled: true,
        labels: Vec::new(),
        metrics: metrics.iter().map(|(n, s)| metric(n, s)).collect(),
    }
}

pub fn dependencies(groups: &[MetricGroupConfig]) -> Arc<DependencySet> {
    Arc::new(DependencyResolver::new(groups, &ResourcesConfig::default()).resolve())
}

/// Partitions labelled by CPC and partition name.
pub fn partition_status_group() -> MetricGroupConfig {
    let mut group = resource_group("partition-props", "partition", &[("zhmc_partition_ifl", "ifl-processors")]);
    group.labels = vec![label("cpc", "resource.parent.name"), label("partition", "resource.name")];
    group
}

/// Polls `condition` for up to two seconds of real time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
