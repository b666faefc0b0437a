//! Assembly of the escalation pipeline
//!
//! [`LogPipeline`] builds the controller, trigger decoupler, pre-error buffer
//! and redactor from one [`Config`], hands out the `tracing` layers that
//! connect them to a subscriber, and tears them down in dependency order.

use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, Layer};

use crate::buffer::{EventSink, LineFormat, PreErrorBuffer, StreamSink};
use crate::config::{Config, RedactionConfig};
use crate::controller::{Escalate, VerbosityController};
use crate::decoupler::TriggerDecoupler;
use crate::error::EscalationError;
use crate::layers::{ContextBufferLayer, LevelGate, TriggerLayer};
use crate::metrics::Telemetry;
use crate::redaction::{Redactor, SharedRedactor};

pub struct LogPipeline {
    controller: Arc<VerbosityController>,
    decoupler: Arc<TriggerDecoupler>,
    buffer: Option<Arc<PreErrorBuffer>>,
    redactor: SharedRedactor,
    telemetry: Arc<Telemetry>,
    context_fields: Vec<String>,
}

impl LogPipeline {
    /// Build the pipeline, replaying buffered events to stdout
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, EscalationError> {
        let format = LineFormat::from_name(&config.server.log_format);
        Self::with_sink(config, Arc::new(StreamSink::stdout(format)))
    }

    /// Build the pipeline with a custom replay destination
    pub fn with_sink(config: &Config, sink: Arc<dyn EventSink>) -> Result<Self, EscalationError> {
        let telemetry = Arc::new(Telemetry::new());

        let redactor = Redactor::compile(&config.redaction)?
            .with_telemetry(telemetry.clone())
            .into_shared();

        let controller = VerbosityController::new(&config.escalation, telemetry.clone())?;
        let target: Arc<dyn Escalate> = controller.clone();
        let decoupler = Arc::new(TriggerDecoupler::spawn(
            target,
            &config.trigger,
            telemetry.clone(),
        )?);

        let buffer = if config.buffer.enabled {
            Some(Arc::new(PreErrorBuffer::new(
                &config.buffer,
                sink,
                redactor.clone(),
                telemetry.clone(),
            )?))
        } else {
            None
        };

        Ok(Self {
            controller,
            decoupler,
            buffer,
            redactor,
            telemetry,
            context_fields: config.buffer.context_fields.clone(),
        })
    }

    pub fn controller(&self) -> &Arc<VerbosityController> {
        &self.controller
    }

    pub fn decoupler(&self) -> &Arc<TriggerDecoupler> {
        &self.decoupler
    }

    pub fn buffer(&self) -> Option<&Arc<PreErrorBuffer>> {
        self.buffer.as_ref()
    }

    pub fn redactor(&self) -> &SharedRedactor {
        &self.redactor
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Layer feeding the pre-error buffer; `None` when buffering is disabled
    pub fn buffer_layer(&self) -> Option<ContextBufferLayer> {
        self.buffer
            .as_ref()
            .map(|buffer| ContextBufferLayer::new(buffer.clone(), self.context_fields.clone()))
    }

    pub fn trigger_layer(&self) -> TriggerLayer {
        TriggerLayer::new(self.decoupler.clone())
    }

    /// Per-layer filter for output layers
    pub fn level_gate(&self) -> LevelGate {
        LevelGate::new(self.controller.clone())
    }

    /// Install the global subscriber: buffer, trigger, then gated console output
    pub fn init_tracing(&self, log_format: &str) -> anyhow::Result<()> {
        let output = match LineFormat::from_name(log_format) {
            LineFormat::Json => fmt::layer().json().with_target(true).boxed(),
            LineFormat::Text => fmt::layer().with_target(true).boxed(),
        };

        tracing_subscriber::registry()
            .with(self.buffer_layer())
            .with(self.trigger_layer())
            .with(output.with_filter(self.level_gate()))
            .try_init()?;

        tracing::debug!(
            mode = ?self.controller.mode(),
            base = %self.controller.base_level(),
            escalated = %self.controller.escalated_level(),
            buffering = self.buffer.is_some(),
            redaction_rules = self.redactor.load().rule_count(),
            "Log pipeline assembled"
        );

        Ok(())
    }

    /// Compile `config` and swap it in as the active redaction rule set
    ///
    /// On error the current rules stay in place.
    pub fn reload_redaction(&self, config: &RedactionConfig) -> Result<usize, EscalationError> {
        let redactor = Redactor::compile(config)?.with_telemetry(self.telemetry.clone());
        let rules = redactor.rule_count();
        self.redactor.store(Arc::new(redactor));
        tracing::info!(rules, "Redaction rules reloaded");
        Ok(rules)
    }

    /// Stop trigger delivery, restore the base level, then flush buffered context
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.decoupler.shutdown().await;
        self.controller.shutdown();
        if let Some(buffer) = &self.buffer {
            buffer.shutdown();
        }
    }
}
