//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG), falling back to a default
///   that is more verbose for the swapframe crates when `verbose` is set
/// - Target and thread id annotations
///
/// Calling this twice is harmless; the second registration is ignored.
///
/// # Example
/// ```
/// swapframe_core::init_logging(false);
/// tracing::info!("Presenter initialized");
/// ```
pub fn init_logging(verbose: bool) {
    let default_directives = if verbose {
        "info,swapframe=debug,swapframe_rhi=debug,swapframe_renderer=debug"
    } else {
        "info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
