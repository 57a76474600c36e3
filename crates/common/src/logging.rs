use crate::config::{Environment, LogLevel};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// `RUST_LOG` wins; otherwise everything at `level` and above.
pub(crate) fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// JSON lines in production, pretty multi-line output in development.
///
/// Always writes to stderr so stdout stays free for command output.
pub(crate) fn fmt_layer<S>(environment: Environment) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

/// Install the global subscriber: env filter, OpenTelemetry bridge and the
/// environment-specific formatter.
///
/// The OpenTelemetry layer only exports when a tracer provider has been set
/// globally. When a subscriber is already installed (for example by
/// [`crate::TelemetryGuard::init`]) this is a no-op.
pub fn setup_logging(level: LogLevel, environment: Environment) {
    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_opentelemetry::layer())
        .with(fmt_layer(environment))
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
}

/// Creates a debug-level span and enters it.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_env_filter_falls_back_to_level() {
        unsafe { env::remove_var("RUST_LOG") };
        assert_eq!(env_filter(LogLevel::Warn).to_string(), "warn");
    }

    #[test]
    #[serial]
    fn test_env_filter_prefers_rust_log() {
        unsafe { env::set_var("RUST_LOG", "detector=trace") };
        assert_eq!(env_filter(LogLevel::Info).to_string(), "detector=trace");
        unsafe { env::remove_var("RUST_LOG") };
    }

    #[test]
    #[serial]
    fn test_setup_logging_twice_is_harmless() {
        setup_logging(LogLevel::Info, Environment::Development);
        setup_logging(LogLevel::Debug, Environment::Production);

        let _span = span!("after_setup");
        tracing::info!("still logging");
    }
}
