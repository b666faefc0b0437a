use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::Config,
    handlers,
    middleware::{request_context, RequestContextState},
    pipeline::LogPipeline,
    signals::setup_signal_handlers,
};

/// Start the HTTP server
///
/// This function:
/// 1. Sets up signal handlers for graceful shutdown and redaction reload
/// 2. Creates the Axum application
/// 3. Binds to the configured address
/// 4. Serves requests with graceful shutdown support
/// 5. Tears down the log pipeline once connections have drained
pub async fn start_server(
    config: Config,
    config_path: PathBuf,
    pipeline: Arc<LogPipeline>,
    metrics_handle: Arc<PrometheusHandle>,
) -> Result<()> {
    // Setup signal handlers (SIGTERM, SIGINT for shutdown; SIGHUP for reload)
    let (shutdown_tx, signal_handle) = setup_signal_handlers(pipeline.clone(), config_path);
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(&config, pipeline.clone(), metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting adaptive logging service on {}", addr);
    info!(
        "Escalation: mode={:?}, base={}, escalated={}, window={}s",
        config.escalation.mode,
        pipeline.controller().base_level(),
        pipeline.controller().escalated_level(),
        config.escalation.duration_seconds
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;

    pipeline.shutdown().await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    config: &Config,
    pipeline: Arc<LogPipeline>,
    metrics_handle: Arc<PrometheusHandle>,
) -> Router {
    let context_state = Arc::new(RequestContextState {
        redactor: pipeline.redactor().clone(),
        capture: config.capture.clone(),
    });

    let log_level_routes = Router::new()
        .route("/log-level", get(handlers::log_level::status))
        .route("/log-level/trigger", post(handlers::log_level::trigger))
        .route("/log-level/contexts", get(handlers::log_level::contexts))
        .with_state(pipeline);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(log_level_routes)
        .layer(middleware::from_fn_with_state(context_state, request_context))
        .layer(TraceLayer::new_for_http())
}
