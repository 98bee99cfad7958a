use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::articles::METRIC_MAINTENANCE_MS,
    cache::{
        METRIC_DROPPED_WRITE, METRIC_ERROR, METRIC_HIT, METRIC_INVALIDATED, METRIC_MISS,
        METRIC_OP_MS,
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    // Logs go to stderr; stdout carries command output.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(METRIC_HIT, Unit::Count, "Total number of cache hits.");
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Total number of cache misses, expired entries included."
        );
        describe_counter!(
            METRIC_ERROR,
            Unit::Count,
            "Total number of backend failures absorbed or surfaced."
        );
        describe_counter!(
            METRIC_DROPPED_WRITE,
            Unit::Count,
            "Total number of writes dropped by the local quota."
        );
        describe_counter!(
            METRIC_INVALIDATED,
            Unit::Count,
            "Total number of entries removed by tag invalidation."
        );
        describe_histogram!(
            METRIC_OP_MS,
            Unit::Milliseconds,
            "Backend operation latency in milliseconds."
        );
        describe_histogram!(
            METRIC_MAINTENANCE_MS,
            Unit::Milliseconds,
            "Article cache maintenance pass latency in milliseconds."
        );
    });
}
