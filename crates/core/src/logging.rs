//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Directive targets match by prefix, so `vge` covers every engine crate.
const DEFAULT_FILTER: &str = "info,vge=debug";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the built-in filter. Validation-layer
/// messages arrive under the `vge_rhi::instance` target.
///
/// # Example
/// ```no_run
/// vge_core::init_logging();
/// tracing::info!("engine starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
