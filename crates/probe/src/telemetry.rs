//! Logging and optional OpenTelemetry setup
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log filter (default: `migra=info`)
//! - `MIGRA_LOG_FORMAT`: `json` for structured output, anything else for pretty
//! - `MIGRA_LOG_DIR`: also write JSON logs to a daily rolling file in this directory
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317),
//!   honored only when built with the `telemetry` feature
//! - `OTEL_SERVICE_NAME`: service name (default: migra-probe)

use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "migra=info";
const LOG_FILE_PREFIX: &str = "migra-probe.log";

/// Keeps the file writer flushing until dropped
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn init_logging() -> Result<LogGuard> {
    let json = std::env::var("MIGRA_LOG_FORMAT").is_ok_and(|f| f == "json");

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .map_err(|e| anyhow!("invalid log filter: {}", e))?;

    let (file_layer, file_guard) = match std::env::var("MIGRA_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    // Production: JSON structured logging; development: pretty formatting
    let structured = json.then(|| fmt::layer().json());
    let pretty = (!json).then(|| fmt::layer().pretty());

    #[cfg(feature = "telemetry")]
    let otel = otel_layer()?;
    #[cfg(not(feature = "telemetry"))]
    let otel: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(structured)
        .with(pretty)
        .with(file_layer)
        .with(otel)
        .try_init()
        .map_err(|e| anyhow!(e))?;

    #[cfg(not(feature = "telemetry"))]
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        tracing::warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
    }

    Ok(LogGuard { _file: file_guard })
}

#[cfg(feature = "telemetry")]
fn otel_layer<S>() -> Result<
    Option<tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>>,
>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "migra-probe".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .map_err(|e| anyhow!("Failed to create OTLP exporter: {}", e))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(service_name);
    // Keep the provider alive; dropping it stops export
    let _ = opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Flush pending spans
#[cfg(feature = "telemetry")]
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(not(feature = "telemetry"))]
pub fn shutdown_telemetry() {}
