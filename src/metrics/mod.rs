//! Exposition: exporter self metrics and the HTTP `/metrics` endpoint.
//!
//! Each response carries the records of one `collect()` followed by the
//! exporter's own `zhmc_exporter_*` metrics.


use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::proto::Counter;
use prometheus::proto::Gauge as GaugeValue;
use prometheus::proto::LabelPair;
use prometheus::proto::Metric;
use prometheus::proto::MetricFamily;
use prometheus::proto::MetricType;
use prometheus::Encoder;
use prometheus::Gauge;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::constants::SELF_METRICS_PREFIX;
use crate::Collector;
use crate::Error;
use crate::MetricKind;
use crate::MetricRecord;
use crate::Result;

lazy_static! {
    pub static ref SCRAPE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("scrape_duration_seconds", "Time spent assembling one scrape")
            .namespace(SELF_METRICS_PREFIX)
            .buckets(exponential_buckets(0.005, 2.0, 12).expect("static bucket layout"))
    )
    .expect("metric can not be created");

    pub static ref RENDER_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("render_errors_total", "Labels or values that could not be rendered")
            .namespace(SELF_METRICS_PREFIX),
        &["group"]
    )
    .expect("metric can not be created");

    pub static ref CACHED_RESOURCES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("cached_resources", "Resources held in the cache per class")
            .namespace(SELF_METRICS_PREFIX),
        &["class"]
    )
    .expect("metric can not be created");

    pub static ref FETCH_CYCLE: Gauge = Gauge::with_opts(
        Opts::new("fetch_cycle_seconds", "Current background fetch cycle duration")
            .namespace(SELF_METRICS_PREFIX)
    )
    .expect("metric can not be created");

    pub static ref FETCH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("fetch_failures_total", "Background fetch cycles that failed")
            .namespace(SELF_METRICS_PREFIX),
        &["class"]
    )
    .expect("metric can not be created");

    pub static ref NOTIFICATIONS_APPLIED: IntCounterVec = IntCounterVec::new(
        Opts::new("notifications_applied_total", "Change notifications applied to the cache")
            .namespace(SELF_METRICS_PREFIX),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref REPOPULATIONS: IntCounter = IntCounter::with_opts(
        Opts::new("repopulations_total", "Full cache re-populations after a notification disconnect")
            .namespace(SELF_METRICS_PREFIX)
    )
    .expect("metric can not be created");

    pub static ref METRIC_SERVICE_FAILURES: IntCounter = IntCounter::with_opts(
        Opts::new("metric_service_failures_total", "Scrapes that omitted metric service values")
            .namespace(SELF_METRICS_PREFIX)
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SCRAPE_DURATION.clone()),
        Box::new(RENDER_ERRORS.clone()),
        Box::new(CACHED_RESOURCES.clone()),
        Box::new(FETCH_CYCLE.clone()),
        Box::new(FETCH_FAILURES.clone()),
        Box::new(NOTIFICATIONS_APPLIED.clone()),
        Box::new(REPOPULATIONS.clone()),
        Box::new(METRIC_SERVICE_FAILURES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("self metric not registered: {}", e);
        }
    }
}

/// Groups records into families by name. The first record of a name fixes
/// the family's type and help; later records of another type are dropped.
pub fn encode_records(records: &[MetricRecord]) -> Vec<MetricFamily> {
    let mut families: BTreeMap<&str, MetricFamily> = BTreeMap::new();

    for record in records {
        let family = families.entry(record.name.as_str()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(record.name.clone());
            family.set_help(record.help.clone());
            family.set_field_type(metric_type(record.kind));
            family
        });
        if family.get_field_type() != metric_type(record.kind) {
            warn!("metric {} declared with conflicting types, record dropped", record.name);
            continue;
        }

        let labels: Vec<LabelPair> = record
            .labels
            .iter()
            .map(|(name, value)| {
                let mut pair = LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.clone());
                pair
            })
            .collect();
        let mut metric = Metric::default();
        metric.set_label(labels.into());
        match record.kind {
            MetricKind::Gauge => {
                let mut gauge = GaugeValue::default();
                gauge.set_value(record.value);
                metric.set_gauge(gauge);
            }
            MetricKind::Counter => {
                let mut counter = Counter::default();
                counter.set_value(record.value);
                metric.set_counter(counter);
            }
        }
        family.mut_metric().push(metric);
    }

    families.into_values().collect()
}

fn metric_type(kind: MetricKind) -> MetricType {
    match kind {
        MetricKind::Gauge => MetricType::GAUGE,
        MetricKind::Counter => MetricType::COUNTER,
    }
}

/// Text exposition of the records followed by the self metrics.
pub fn render_exposition(records: &[MetricRecord]) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut families = encode_records(records);
    families.extend(REGISTRY.gather());

    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| Error::ServerError(format!("could not encode metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| Error::ServerError(format!("metrics are not utf-8: {e}")))
}

/// `GET /<path>` route answering with one scrape.
pub fn metrics_route(
    path: String,
    collector: Arc<Collector>,
    fatal_tx: mpsc::Sender<Error>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::get()
        .and(warp::path(path))
        .and(warp::path::end())
        .and(warp::any().map(move || collector.clone()))
        .and(warp::any().map(move || fatal_tx.clone()))
        .and_then(metrics_handler)
}

/// Serves the metrics route until the shutdown signal fires.
///
/// # Errors
/// Returns `ServerError` when the address cannot be bound.
pub async fn start_server(
    addr: SocketAddr,
    path: String,
    collector: Arc<Collector>,
    fatal_tx: mpsc::Sender<Error>,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let route = metrics_route(path.clone(), collector, fatal_tx);
    let (bound, server) = warp::serve(route)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_signal.changed().await;
        })
        .map_err(|e| Error::ServerError(format!("could not bind {addr}: {e}")))?;

    info!("serving metrics on http://{}/{}", bound, path);
    server.await;
    info!("metrics endpoint stopped");
    Ok(())
}

async fn metrics_handler(
    collector: Arc<Collector>,
    fatal_tx: mpsc::Sender<Error>,
) -> std::result::Result<Response, Rejection> {
    let records = match collector.collect().await {
        Ok(records) => records,
        Err(e) if e.is_fatal() => {
            error!("scrape aborted: {}", e);
            if fatal_tx.send(e).await.is_err() {
                warn!("exporter already stopping");
            }
            return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
        }
        Err(e) => {
            warn!("scrape failed: {}", e);
            Vec::new()
        }
    };

    match render_exposition(&records) {
        Ok(body) => Ok(warp::reply::with_header(body, "content-type", TextEncoder::new().format_type()).into_response()),
        Err(e) => {
            error!("{}", e);
            Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
