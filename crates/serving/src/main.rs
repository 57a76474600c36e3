use common::{TelemetryGuard, setup_logging};
use detector::OrtBackend;
use serving::config::ServingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServingConfig::from_env();

    let _telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| {
            TelemetryGuard::init("serving", endpoint, config.log_level, config.environment)
        })
        .transpose()?;

    setup_logging(config.log_level, config.environment);

    tracing::info!(config = ?config, "Loaded configuration");

    serving::serve::<OrtBackend>(config).await
}
