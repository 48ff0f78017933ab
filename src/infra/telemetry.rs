use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

/// Register descriptions for every counter the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cachet_request_hit_total",
            Unit::Count,
            "Responses served from the request cache."
        );
        describe_counter!(
            "cachet_request_miss_total",
            Unit::Count,
            "Request cache lookups that fell through to the handler."
        );
        describe_counter!(
            "cachet_request_store_total",
            Unit::Count,
            "Response bodies written to the request cache."
        );
        describe_counter!(
            "cachet_fragment_hit_total",
            Unit::Count,
            "Fragments served from the cache."
        );
        describe_counter!(
            "cachet_fragment_miss_total",
            Unit::Count,
            "Fragments rendered because no cached copy existed."
        );
        describe_counter!(
            "cachet_store_evict_total",
            Unit::Count,
            "In-process store evictions due to capacity."
        );
        describe_counter!(
            "cachet_object_load_total",
            Unit::Count,
            "Full object loads served by the in-memory object store."
        );
    });
}
