//! Telemetry initialization (logging and error tracing)

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::Args;

const SERVICE_NAME: &str = "keeper";

/// Keeps exporters alive; flushes pending spans when dropped.
pub struct TelemetryGuards {
    otlp: bool,
}

impl Drop for TelemetryGuards {
    fn drop(&mut self) {
        if self.otlp {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Install the global subscriber: env filter, pretty or JSON output, and
/// an OTLP exporter when an endpoint is configured.
pub fn init_telemetry(args: &Args) -> Result<TelemetryGuards> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Failed to create environment filter")?;

    let fmt_layer = if args.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .boxed()
    };

    let otel_layer = match &args.otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .context("Failed to install OTLP pipeline")?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let otlp = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(endpoint) = &args.otlp_endpoint {
        tracing::info!(otlp_endpoint = %endpoint, "Exporting telemetry over OTLP");
    }

    Ok(TelemetryGuards { otlp })
}
