use crate::config::Environment;
use opentelemetry::global;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (e.g.
/// `"info,screenstream=debug"`) is used. Development gets pretty output,
/// production gets JSON lines.
///
/// An OpenTelemetry layer bound to the global tracer is always attached. It
/// only exports when a tracer provider was installed first (see
/// [`crate::TelemetryGuard`]); otherwise spans go to the no-op tracer.
pub fn setup_logging(environment: Environment, service_name: &'static str, default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_opentelemetry::layer().with_tracer(global::tracer(service_name)));

    let result = match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init(),
        Environment::Development => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}
