// Logging setup shared by Nocturne front-ends
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or `default_filter` when
/// `RUST_LOG` is unset or invalid.
///
/// Safe to call more than once; later calls are ignored.
///
/// # Example
///
/// ```no_run
/// nocturne_core::telemetry::init_tracing("info,nocturne_core=debug");
/// ```
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
