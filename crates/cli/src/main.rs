use clap::Parser;
use cli::args::{Cli, Commands};
use cli::commands;
use common::config::otel_endpoint;
use common::{Environment, LogLevel, TelemetryGuard, setup_logging};
use detector::OrtBackend;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = LogLevel::from_env();
    let environment = Environment::from_env();

    // Both the OTLP exporters and `serve` need a runtime; keep it alive until exit.
    let runtime = tokio::runtime::Runtime::new()?;
    let _telemetry = otel_endpoint()
        .map(|endpoint| {
            runtime.block_on(async { TelemetryGuard::init("yolov3", &endpoint, level, environment) })
        })
        .transpose()?;

    setup_logging(level, environment);

    match cli.command {
        Commands::Run(args) => {
            let results = commands::run::<OrtBackend>(&args)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Serve(args) => {
            runtime.block_on(commands::serve::<OrtBackend>(&args))?;
        }
        Commands::Export(args) => {
            let dir = commands::export::<OrtBackend>(&args)?;
            println!("Model bundle saved to {}", dir.display());
        }
    }

    Ok(())
}
