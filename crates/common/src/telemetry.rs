use crate::config::{Environment, LogLevel, env_or};
use crate::logging::{env_filter, fmt_layer};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_METRIC_INTERVAL_MS: u64 = 10_000;

/// Owns the OTLP trace and metric pipelines. Dropping it flushes both.
///
/// Must be created inside a Tokio runtime: the batch exporters spawn onto it.
///
/// ```ignore
/// let _telemetry = TelemetryGuard::init("serving", "http://localhost:4317", LogLevel::Info, Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Start exporting to `endpoint` and install the tracing subscriber.
    ///
    /// A later [`crate::setup_logging`] call is then a no-op. Metrics are pushed
    /// every `OTEL_METRIC_EXPORT_INTERVAL` milliseconds (default 10 s).
    pub fn init(
        service_name: &str,
        endpoint: &str,
        level: LogLevel,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = service_resource(service_name, environment);
        let tracer_provider = build_tracer_provider(endpoint, resource.clone())?;
        let interval = Duration::from_millis(env_or(
            "OTEL_METRIC_EXPORT_INTERVAL",
            DEFAULT_METRIC_INTERVAL_MS,
        ));
        let meter_provider = build_meter_provider(endpoint, resource, interval)?;

        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        let tracer = tracer_provider.tracer(service_name.to_string());
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(fmt_layer(environment))
            .try_init()?;

        tracing::info!(
            service_name,
            endpoint,
            metric_interval_ms = interval.as_millis() as u64,
            "OpenTelemetry export enabled"
        );

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("tracer provider shutdown failed: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("meter provider shutdown failed: {:?}", e);
        }
    }
}

fn service_resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn build_tracer_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn build_meter_provider(
    endpoint: &str,
    resource: Resource,
    interval: Duration,
) -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}
