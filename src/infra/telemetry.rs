//! Tracing subscriber setup and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Clone, Copy)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Every metric the crate emits.
const METRICS: &[(&str, MetricKind, &str)] = &[
    (
        "infocache_provider_hit_total",
        MetricKind::Counter,
        "Provider lookups answered by a cached object.",
    ),
    (
        "infocache_provider_miss_total",
        MetricKind::Counter,
        "Provider lookups that went to the store.",
    ),
    (
        "infocache_provider_negative_hit_total",
        MetricKind::Counter,
        "Provider lookups answered by a cached not-found marker.",
    ),
    (
        "infocache_farm_task_created_total",
        MetricKind::Counter,
        "Web-farm tasks created and broadcast by this node.",
    ),
    (
        "infocache_farm_task_applied_total",
        MetricKind::Counter,
        "Received web-farm tasks applied on this node.",
    ),
    (
        "infocache_farm_task_failed_total",
        MetricKind::Counter,
        "Received web-farm tasks that were malformed or whose handler failed.",
    ),
    (
        "infocache_farm_task_skipped_total",
        MetricKind::Counter,
        "Received web-farm tasks skipped (own origin, condition or duplicate).",
    ),
    (
        "infocache_farm_inbox_len",
        MetricKind::Gauge,
        "Received tasks waiting in the inbox.",
    ),
    (
        "infocache_farm_consume_ms",
        MetricKind::Histogram,
        "Inbox batch consumption latency in milliseconds.",
    ),
];

/// Install the global subscriber: env filter (`RUST_LOG` wins over the
/// configured level), span traces for errors, and a JSON or compact layer.
pub fn init(logging: &LoggingSettings, node: &str) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))?;

    info!(node, level = %logging.level, "Telemetry initialized");
    Ok(())
}

/// Register descriptions with the installed metrics recorder; later calls
/// are no-ops.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for &(name, kind, description) in METRICS {
            match kind {
                MetricKind::Counter => describe_counter!(name, Unit::Count, description),
                MetricKind::Gauge => describe_gauge!(name, Unit::Count, description),
                MetricKind::Histogram => {
                    describe_histogram!(name, Unit::Milliseconds, description)
                }
            }
        }
    });
}
