use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::{Resource, trace};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{AppConfig, TelemetryConfig};

/// Guard that owns the tracer provider so buffered spans flush on drop.
pub struct TelemetryGuard {
    provider: Option<Arc<SdkTracerProvider>>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if Arc::strong_count(&provider) == 1 {
                let _ = provider.shutdown();
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
}

/// Initialize structured logging (RUST_LOG driven) and optional OpenTelemetry
/// tracing. JSON output in production, pretty output in dev.
pub fn init_telemetry(
    app: &AppConfig,
    telemetry: &TelemetryConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;

    let (tracer, provider) = build_tracer(app, telemetry)?;
    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let json_format = !app.env.eq_ignore_ascii_case("dev");
    let fmt_layer = if json_format {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .pretty()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(env_filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;

    Ok(TelemetryGuard { provider })
}

fn build_tracer(
    app: &AppConfig,
    telemetry: &TelemetryConfig,
) -> Result<(Option<trace::Tracer>, Option<Arc<SdkTracerProvider>>), TelemetryError> {
    if !telemetry.export_traces {
        return Ok((None, None));
    }

    let endpoint = match telemetry.otlp_endpoint.as_deref() {
        Some(endpoint) if !endpoint.is_empty() => endpoint,
        _ => return Ok((None, None)),
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_timeout(Duration::from_secs(3))
        .with_endpoint(endpoint)
        .build()
        .map_err(|err| TelemetryError::ExporterBuild(err.to_string()))?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", app.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", app.env.clone()),
        ])
        .build();
    let provider = SdkTracerProvider::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .with_resource(resource)
        .build();

    let provider = Arc::new(provider);

    global::set_tracer_provider(provider.as_ref().clone());
    global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    let tracer = provider.tracer(app.service_name.clone());

    Ok((Some(tracer), Some(provider)))
}
