use adaptive_logging::{config, metrics, pipeline::LogPipeline, server};
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Execute the start command
///
/// This will:
/// 1. Load and validate configuration
/// 2. Install the metrics recorder
/// 3. Build the log pipeline and install it as the global subscriber
/// 4. Start the server
pub async fn execute(config_path: PathBuf) -> Result<()> {
    println!("{}", "Starting adaptive logging service...".green());

    let cfg = config::load_config_from(&config_path)?;

    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let pipeline = Arc::new(LogPipeline::from_config(&cfg)?);
    pipeline.init_tracing(&cfg.server.log_format)?;

    // Level fallbacks were resolved before the subscriber was installed
    for (setting, name) in cfg.escalation.unrecognized_levels() {
        warn!(
            setting,
            level = %name,
            "Unrecognized level name, using default"
        );
    }

    info!(
        config = %config_path.display(),
        "Log pipeline installed"
    );

    // Blocks until shutdown; tears the pipeline down on the way out
    server::start_server(cfg, config_path, pipeline, metrics_handle).await?;

    Ok(())
}
