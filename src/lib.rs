pub mod buffer;
pub mod config;
pub mod controller;
pub mod decoupler;
pub mod error;
pub mod event;
pub mod handlers;
pub mod layers;
pub mod level;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod redaction;
pub mod server;
pub mod signals;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize plain tracing for CLI commands that do not run the server
///
/// The server installs its own subscriber through
/// [`pipeline::LogPipeline::init_tracing`] instead.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
