/// Integration tests for error-triggered escalation through a real subscriber
use adaptive_logging::{
    buffer::MemorySink,
    config::Config,
    level::Severity,
    pipeline::LogPipeline,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

/// Output layer that records the messages it is allowed to see
#[derive(Clone, Default)]
struct Output {
    lines: Arc<Mutex<Vec<(tracing::Level, String)>>>,
}

impl Output {
    fn messages(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    fn contains(&self, message: &str) -> bool {
        self.messages().iter().any(|m| m == message)
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for Output {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.lines
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

fn scenario_config() -> Config {
    let mut config = Config::default();
    config.escalation.base_level = "Warning".to_string();
    config.escalation.escalated_level = "Information".to_string();
    config.escalation.duration_seconds = 1;
    config
}

/// Let the trigger consumer task run
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_error_escalates_flushes_and_reverts() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = LogPipeline::with_sink(&scenario_config(), sink.clone()).unwrap();
    let output = Output::default();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer())
        .with(output.clone().with_filter(pipeline.level_gate()));
    let _guard = tracing::subscriber::set_default(subscriber);

    {
        let span = tracing::info_span!("request", request_id = "T");
        let _entered = span.enter();
        tracing::info!("loading account");
        tracing::info!("account loaded");
        tracing::error!("payment declined");
    }

    // Context replayed synchronously, before the escalation is even scheduled
    assert_eq!(sink.messages(), ["loading account", "account loaded"]);
    assert!(!output.contains("loading account"));
    assert!(output.contains("payment declined"));

    settle().await;
    assert_eq!(pipeline.controller().current_level(), Severity::Information);
    assert!(output.contains("Log verbosity escalated"));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    settle().await;
    assert_eq!(pipeline.controller().current_level(), Severity::Warning);
    assert!(output.contains("Log verbosity restored"));

    // The error itself was never replayed, and nothing was replayed twice
    assert_eq!(sink.len(), 2);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_gate_admits_information_only_while_escalated() {
    let pipeline = LogPipeline::with_sink(&scenario_config(), Arc::new(MemorySink::new())).unwrap();
    let output = Output::default();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer())
        .with(output.clone().with_filter(pipeline.level_gate()));
    let _guard = tracing::subscriber::set_default(subscriber);

    tracing::info!("before");
    tracing::error!("trigger");
    settle().await;

    tracing::info!("during");
    tracing::debug!("too verbose");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    settle().await;
    tracing::info!("after");

    assert!(!output.contains("before"));
    assert!(output.contains("during"));
    assert!(!output.contains("too verbose"));
    assert!(!output.contains("after"));

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_error_in_one_context_leaves_others_buffered() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = LogPipeline::with_sink(&scenario_config(), sink.clone()).unwrap();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    tracing::info!(request_id = "A", "a1");
    tracing::info!(request_id = "B", "b1");
    tracing::info!(request_id = "A", "a2");
    tracing::error!(request_id = "A", "a failed");

    assert_eq!(sink.messages(), ["a1", "a2"]);
    let buffer = pipeline.buffer().unwrap();
    assert_eq!(buffer.retained("B"), 1);

    // Teardown replays whatever is still retained
    pipeline.shutdown().await;
    assert!(sink.messages().contains(&"b1".to_string()));
    assert_eq!(buffer.context_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_error_storm_escalates_once() {
    let pipeline = LogPipeline::with_sink(&scenario_config(), Arc::new(MemorySink::new())).unwrap();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    for i in 0..500 {
        tracing::error!(attempt = i, "upstream unavailable");
    }
    settle().await;

    let snapshot = pipeline.telemetry().snapshot();
    assert_eq!(snapshot.errors_observed, 500);
    // Queue overflow is coalesced, and the survivors land inside the re-trigger interval
    assert!(snapshot.signals_dropped > 0);
    assert_eq!(snapshot.triggers, 1);
    assert_eq!(
        snapshot.errors_observed,
        snapshot.signals_dropped + snapshot.triggers + snapshot.skipped_triggers
    );
    assert_eq!(pipeline.controller().current_level(), Severity::Information);

    pipeline.shutdown().await;
}
