use adaptive_logging::config::{self, Config, RedactionConfig};
use adaptive_logging::level::{Severity, DEFAULT_BASE_LEVEL, DEFAULT_ESCALATED_LEVEL};
use adaptive_logging::redaction::Redactor;
use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration after file and environment merging
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config_from(config_path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&cfg)?;
    println!("{}", toml_string);

    Ok(())
}

/// Execute the config validate command
///
/// Loads the configuration, then compiles every redaction pattern strictly so
/// malformed ones are reported instead of silently skipped
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config_from(config_path)?;

    let malformed = malformed_patterns(&cfg.redaction);
    if !malformed.is_empty() {
        println!("{}", "✗ Malformed redaction patterns:".red().bold());
        for (pattern, error) in &malformed {
            println!("  {}: {}", pattern, error);
        }
        anyhow::bail!("{} redaction pattern(s) failed to compile", malformed.len());
    }

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    for line in summary(&cfg) {
        println!("  {}", line);
    }

    info!("Configuration validation successful");
    Ok(())
}

/// Patterns that fail to compile, with the compiler's message
fn malformed_patterns(redaction: &RedactionConfig) -> Vec<(String, String)> {
    redaction
        .rules
        .iter()
        .filter_map(|pattern| {
            let single = RedactionConfig {
                rules: vec![pattern.clone()],
                strict: true,
                ..redaction.clone()
            };
            Redactor::compile(&single)
                .err()
                .map(|e| (pattern.clone(), e.to_string()))
        })
        .collect()
}

fn summary(cfg: &Config) -> Vec<String> {
    let base = resolved_level(&cfg.escalation.base_level, DEFAULT_BASE_LEVEL);
    let escalated = resolved_level(&cfg.escalation.escalated_level, DEFAULT_ESCALATED_LEVEL);

    let buffer = if cfg.buffer.enabled {
        format!(
            "{} events x {} contexts",
            cfg.buffer.capacity_per_context, cfg.buffer.max_contexts
        )
    } else {
        "disabled".to_string()
    };

    vec![
        format!("Mode: {:?}", cfg.escalation.mode),
        format!("Levels: {} -> {}", base, escalated),
        format!(
            "Window: {}s (re-trigger after {}ms)",
            cfg.escalation.duration_seconds, cfg.escalation.retrigger_interval_ms
        ),
        format!("Trigger Queue: {}", cfg.trigger.queue_capacity),
        format!("Pre-Error Buffer: {}", buffer),
        format!("Redaction Rules: {}", cfg.redaction.rules.len()),
    ]
}

/// Show a configured level the way the controller will read it
fn resolved_level(name: &str, default: Severity) -> String {
    match name.parse::<Severity>() {
        Ok(level) => level.to_string(),
        Err(_) => format!("{} (unrecognized '{}')", default, name),
    }
}
