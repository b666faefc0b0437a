use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::level::Severity;

/// Longest escalation window accepted (one week)
pub const MAX_DURATION_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Largest trigger queue accepted
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Output format for the console layer: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: default_log_format(),
        }
    }
}

/// Escalation operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// Quiet by default, escalate on errors, revert after the window
    #[default]
    Auto,
    /// Always log at the escalated level
    AlwaysOn,
    /// Always log at the base level, triggers are ignored
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EscalationConfig {
    #[serde(default)]
    pub mode: EscalationMode,

    /// Level used outside an escalation window (default: "Warning")
    #[serde(default = "default_base_level")]
    pub base_level: String,

    /// Level used inside an escalation window (default: "Information")
    #[serde(default = "default_escalated_level")]
    pub escalated_level: String,

    /// Length of an escalation window in seconds (default: 60)
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,

    /// Minimum spacing between window extensions in milliseconds (default: 5000)
    #[serde(default = "default_retrigger_interval_ms")]
    pub retrigger_interval_ms: u64,
}

impl EscalationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn retrigger_interval(&self) -> Duration {
        Duration::from_millis(self.retrigger_interval_ms)
    }

    /// Level settings that will not parse, as `(setting, value)` pairs
    pub fn unrecognized_levels(&self) -> Vec<(&'static str, &str)> {
        [
            ("base_level", self.base_level.as_str()),
            ("escalated_level", self.escalated_level.as_str()),
        ]
        .into_iter()
        .filter(|(_, name)| name.parse::<Severity>().is_err())
        .collect()
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            mode: EscalationMode::default(),
            base_level: default_base_level(),
            escalated_level: default_escalated_level(),
            duration_seconds: default_duration_seconds(),
            retrigger_interval_ms: default_retrigger_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriggerConfig {
    /// Pending trigger signals kept before the oldest is coalesced away (default: 64)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Time allowed for the consumer task to stop on shutdown (default: 2000)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl TriggerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Enable pre-error context buffering (default: true)
    #[serde(default = "default_buffer_enabled")]
    pub enabled: bool,

    /// Events retained per logical context (default: 100)
    #[serde(default = "default_capacity_per_context")]
    pub capacity_per_context: usize,

    /// Logical contexts tracked before LRU eviction (default: 1024)
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,

    /// Event/span fields that carry the logical context key, in priority order
    #[serde(default = "default_context_fields")]
    pub context_fields: Vec<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: default_buffer_enabled(),
            capacity_per_context: default_capacity_per_context(),
            max_contexts: default_max_contexts(),
            context_fields: default_context_fields(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedactionConfig {
    /// Regular expressions whose matches are replaced by `marker`
    #[serde(default)]
    pub rules: Vec<String>,

    /// Replacement text for every match (default: "***REDACTED***")
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Reject malformed rules at startup instead of skipping them (default: false)
    #[serde(default)]
    pub strict: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            marker: default_marker(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Attach (redacted) request bodies to the request's log context (default: false)
    #[serde(default)]
    pub request_body: bool,

    /// Maximum body bytes read for capture (default: 16384)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            request_body: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_base_level() -> String {
    "Warning".to_string()
}

fn default_escalated_level() -> String {
    "Information".to_string()
}

fn default_duration_seconds() -> u64 {
    60
}

fn default_retrigger_interval_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_buffer_enabled() -> bool {
    true
}

fn default_capacity_per_context() -> usize {
    100
}

fn default_max_contexts() -> usize {
    1024
}

fn default_context_fields() -> Vec<String> {
    vec!["trace_id".to_string(), "request_id".to_string()]
}

fn default_marker() -> String {
    "***REDACTED***".to_string()
}

fn default_max_body_bytes() -> usize {
    16 * 1024
}

/// Load configuration from `config.toml` (optional) and `ADAPTIVE_LOGGING__*` env vars
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config.toml"))
}

/// Load configuration from an explicit file path (optional) and env vars
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("ADAPTIVE_LOGGING").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.escalation.duration_seconds == 0 {
        anyhow::bail!("escalation.duration_seconds must be greater than 0");
    }

    if cfg.escalation.duration_seconds > MAX_DURATION_SECONDS {
        anyhow::bail!(
            "escalation.duration_seconds must be at most {}",
            MAX_DURATION_SECONDS
        );
    }

    if cfg.trigger.queue_capacity == 0 {
        anyhow::bail!("trigger.queue_capacity must be greater than 0");
    }

    if cfg.trigger.queue_capacity > MAX_QUEUE_CAPACITY {
        anyhow::bail!("trigger.queue_capacity must be at most {}", MAX_QUEUE_CAPACITY);
    }

    if cfg.buffer.capacity_per_context == 0 {
        anyhow::bail!("buffer.capacity_per_context must be greater than 0");
    }

    if cfg.buffer.max_contexts == 0 {
        anyhow::bail!("buffer.max_contexts must be greater than 0");
    }

    if cfg.capture.max_body_bytes == 0 {
        anyhow::bail!("capture.max_body_bytes must be greater than 0");
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("server.log_format must be 'text' or 'json', got '{}'", other),
    }

    Ok(())
}
