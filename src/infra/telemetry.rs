use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing::{Subscriber, level_filters::LevelFilter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Counters emitted by the cache layer, with their help text.
const COUNTERS: [(&str, &str); 5] = [
    (
        "vercache_output_hit_total",
        "Cacheable requests answered from the output cache.",
    ),
    (
        "vercache_output_miss_total",
        "Cacheable requests that ran the handler.",
    ),
    (
        "vercache_output_store_total",
        "Handler responses written to the output cache.",
    ),
    (
        "vercache_output_skip_total",
        "Missed responses not written to the cache, labelled by reason.",
    ),
    (
        "vercache_store_evict_total",
        "Stored values evicted, labelled by cause (capacity, expired, dependency).",
    ),
];

/// Install the global tracing subscriber and register metric descriptions.
///
/// `RUST_LOG` directives, when set, refine the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    tracing_subscriber::registry()
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, help) in COUNTERS {
            describe_counter!(name, Unit::Count, help);
        }
    });
}
