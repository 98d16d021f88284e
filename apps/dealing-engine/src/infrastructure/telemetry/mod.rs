//! Tracing and span export.
//!
//! Every log line goes through `tracing` behind an `EnvFilter`; spans are
//! additionally exported over OTLP unless `OTEL_ENABLED` is "false".
//! [`init`] reads `OTEL_EXPORTER_OTLP_ENDPOINT` and `OTEL_SERVICE_NAME`
//! from the environment and returns a [`TelemetryGuard`] that flushes the
//! exporter on drop, so the guard must live until the process exits.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "dealing-engine";
const DEFAULT_ENDPOINT: &str = "http://localhost:4318";

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            // The subscriber may already be gone here, so stderr it is.
            if let Err(e) = provider.shutdown() {
                eprintln!("OTLP tracer shutdown failed: {e}");
            }
        }
    }
}

/// Knobs for the tracing setup, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether spans are exported at all.
    pub enabled: bool,
    /// Collector address the OTLP exporter ships spans to.
    pub otlp_endpoint: String,
    /// Service name attached to every exported span.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_ENDPOINT.to_string(),
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read the `OTEL_*` variables, falling back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("OTEL_ENABLED")
                .map_or(true, |v| !v.eq_ignore_ascii_case("false")),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Wire the subscriber from the environment and start span export.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// shuts the exporter down.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Wire the subscriber from an explicit configuration.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false);
    let registry = tracing_subscriber::registry()
        .with(base_filter())
        .with(fmt_layer);

    if !config.enabled {
        registry.init();
        return TelemetryGuard {
            tracer_provider: None,
        };
    }

    let provider = otlp_provider(&config);
    let tracer = provider.tracer(config.service_name);
    registry
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    TelemetryGuard {
        tracer_provider: Some(provider),
    }
}

/// `RUST_LOG` wins; the directives only quiet the HTTP internals and keep
/// the engine itself at info.
#[allow(clippy::expect_used)]
fn base_filter() -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["dealing_engine=info", "tower_http=info", "h2=warn", "hyper=warn"] {
        filter = filter.add_directive(directive.parse().expect("static log directive must parse"));
    }
    filter
}

#[allow(clippy::expect_used)]
fn otlp_provider(config: &TelemetryConfig) -> SdkTracerProvider {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .expect("OTLP span exporter must build from a static configuration");

    SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_export_to_local_collector() {
        let config = TelemetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.otlp_endpoint, "http://localhost:4318");
        assert_eq!(config.service_name, "dealing-engine");
    }

    #[test]
    fn guard_without_provider_drops_quietly() {
        let guard = TelemetryGuard {
            tracer_provider: None,
        };
        drop(guard);
    }
}
