//! `tracing` integration
//!
//! Three pieces plug the escalation machinery into a `tracing_subscriber`
//! registry:
//!
//! - [`ContextBufferLayer`] sees every event, before any level filtering,
//!   and feeds it to the [`PreErrorBuffer`]
//! - [`TriggerLayer`] forwards error-class events to the [`TriggerDecoupler`]
//! - [`LevelGate`] is a per-layer filter for output layers that reads the
//!   controller's live threshold on every event
//!
//! Layer order matters: the buffer layer must be added before the output
//! layer so replayed context is written ahead of the error that caused it.

use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::Interest;
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Filter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::buffer::PreErrorBuffer;
use crate::controller::VerbosityController;
use crate::decoupler::TriggerDecoupler;
use crate::event::{EventVisitor, LogEvent};
use crate::level::Severity;

/// Filters output layers against the controller's live threshold
#[derive(Clone)]
pub struct LevelGate {
    controller: Arc<VerbosityController>,
}

impl LevelGate {
    pub fn new(controller: Arc<VerbosityController>) -> Self {
        Self { controller }
    }
}

impl<S> Filter<S> for LevelGate {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        // Spans stay enabled so output keeps its span context
        if meta.is_span() {
            return true;
        }
        self.controller.allows(Severity::from_tracing(meta.level()))
    }

    fn callsite_enabled(&self, _meta: &'static Metadata<'static>) -> Interest {
        // The threshold moves at runtime, never let a callsite cache the answer
        Interest::sometimes()
    }
}

/// Context identifier recorded on a span
#[derive(Debug, Clone)]
struct ContextId(String);

/// Retains every event in the pre-error buffer, keyed by logical context
pub struct ContextBufferLayer {
    buffer: Arc<PreErrorBuffer>,
    context_fields: Arc<[String]>,
}

impl ContextBufferLayer {
    /// `context_fields` lists the field names that identify a context, highest
    /// priority first
    pub fn new(buffer: Arc<PreErrorBuffer>, context_fields: Vec<String>) -> Self {
        Self {
            buffer,
            context_fields: context_fields.into(),
        }
    }

    fn context_of(&self, record: impl FnOnce(&mut dyn Visit)) -> Option<String> {
        let mut visitor = EventVisitor::new(&self.context_fields);
        record(&mut visitor);
        visitor.context_id()
    }
}

impl<S> Layer<S> for ContextBufferLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(context_id) = self.context_of(|v| attrs.record(v)) else {
            return;
        };
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(ContextId(context_id));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(context_id) = self.context_of(|v| values.record(v)) else {
            return;
        };
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            extensions.remove::<ContextId>();
            extensions.insert(ContextId(context_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if self.buffer.is_shut_down() {
            return;
        }

        let metadata = event.metadata();
        let mut visitor = EventVisitor::new(&self.context_fields);
        event.record(&mut visitor);

        // Event fields win over the nearest span that carries an id
        let context_id = visitor.context_id().or_else(|| {
            ctx.event_scope(event)?.find_map(|span| {
                let extensions = span.extensions();
                extensions.get::<ContextId>().map(|ContextId(id)| id.clone())
            })
        });

        let severity = Severity::classify(metadata.level(), visitor.fatal);
        let mut captured = LogEvent::new(severity, visitor.message.take().unwrap_or_default())
            .with_target(metadata.target());
        captured.context_id = context_id;
        captured.fields = std::mem::take(&mut visitor.fields);

        self.buffer.admit(captured);
    }
}

/// Forwards error-class events to the trigger decoupler
pub struct TriggerLayer {
    decoupler: Arc<TriggerDecoupler>,
}

impl TriggerLayer {
    pub fn new(decoupler: Arc<TriggerDecoupler>) -> Self {
        Self { decoupler }
    }
}

impl<S> Layer<S> for TriggerLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = event.metadata().level();
        if *level != tracing::Level::ERROR {
            return;
        }

        let mut fatal = FatalFlag(false);
        event.record(&mut fatal);
        self.decoupler.on_event(Severity::classify(level, fatal.0));
    }
}

/// Picks up `fatal = true` without collecting anything else
struct FatalFlag(bool);

impl Visit for FatalFlag {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "fatal" {
            self.0 = value;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemorySink;
    use crate::config::{BufferConfig, EscalationConfig, TriggerConfig};
    use crate::metrics::Telemetry;
    use crate::redaction::Redactor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_subscriber::prelude::*;

    fn buffer_with_sink() -> (Arc<PreErrorBuffer>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let buffer = PreErrorBuffer::new(
            &BufferConfig::default(),
            sink.clone(),
            Redactor::empty().into_shared(),
            Arc::new(Telemetry::new()),
        )
        .unwrap();
        (Arc::new(buffer), sink)
    }

    fn context_fields() -> Vec<String> {
        vec!["trace_id".to_string(), "request_id".to_string()]
    }

    #[test]
    fn test_event_field_selects_context() {
        let (buffer, sink) = buffer_with_sink();
        let subscriber = tracing_subscriber::registry()
            .with(ContextBufferLayer::new(buffer.clone(), context_fields()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(request_id = "req-1", "first");
            tracing::debug!(request_id = "req-2", "other");
            tracing::error!(request_id = "req-1", "failed");
        });

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "first");
        assert_eq!(events[0].context_id.as_deref(), Some("req-1"));
        assert_eq!(buffer.retained("req-2"), 1);
    }

    #[test]
    fn test_span_supplies_ambient_context() {
        let (buffer, sink) = buffer_with_sink();
        let subscriber = tracing_subscriber::registry()
            .with(ContextBufferLayer::new(buffer.clone(), context_fields()));

        tracing::subscriber::with_default(subscriber, || {
            let request = tracing::info_span!("request", request_id = "req-7");
            let _entered = request.enter();
            let inner = tracing::debug_span!("db_query");
            let _inner = inner.enter();

            tracing::debug!(rows = 3, "query finished");
            tracing::error!("query failed");
        });

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].context_id.as_deref(), Some("req-7"));
        assert_eq!(events[0].fields["rows"], 3);
    }

    #[test]
    fn test_recorded_span_field_updates_context() {
        let (buffer, _sink) = buffer_with_sink();
        let subscriber = tracing_subscriber::registry()
            .with(ContextBufferLayer::new(buffer.clone(), context_fields()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("job", trace_id = tracing::field::Empty);
            span.record("trace_id", "trace-42");
            let _entered = span.enter();
            tracing::info!("working");
        });

        assert_eq!(buffer.retained("trace-42"), 1);
    }

    #[test]
    fn test_events_without_context_use_global() {
        let (buffer, _sink) = buffer_with_sink();
        let subscriber = tracing_subscriber::registry()
            .with(ContextBufferLayer::new(buffer.clone(), context_fields()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("no context here");
        });

        assert_eq!(buffer.retained(crate::event::GLOBAL_CONTEXT), 1);
    }

    /// Counts events that reach the output layer
    #[derive(Clone, Default)]
    struct Counting {
        seen: Arc<AtomicUsize>,
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl<S: Subscriber> Layer<S> for Counting {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = EventVisitor::new(&[]);
            event.record(&mut visitor);
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.messages
                .lock()
                .unwrap()
                .push(visitor.message.unwrap_or_default());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_level_gate_follows_controller() {
        let controller =
            VerbosityController::new(&EscalationConfig::default(), Arc::new(Telemetry::new()))
                .unwrap();
        let output = Counting::default();
        let subscriber = tracing_subscriber::registry()
            .with(output.clone().with_filter(LevelGate::new(controller.clone())));

        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::info!("hidden");
        tracing::warn!("shown at base");
        controller.trigger();
        tracing::info!("shown while escalated");
        tracing::debug!("still hidden");

        assert_eq!(
            *output.messages.lock().unwrap(),
            ["shown at base", "Log verbosity escalated", "shown while escalated"]
        );
    }

    #[tokio::test]
    async fn test_trigger_layer_forwards_errors_only() {
        #[derive(Default)]
        struct Calls(AtomicUsize);
        impl crate::controller::Escalate for Calls {
            fn escalate(&self) -> crate::controller::TriggerOutcome {
                self.0.fetch_add(1, Ordering::SeqCst);
                crate::controller::TriggerOutcome::Escalated
            }
        }

        let calls = Arc::new(Calls::default());
        let telemetry = Arc::new(Telemetry::new());
        let decoupler = Arc::new(
            TriggerDecoupler::spawn(calls.clone(), &TriggerConfig::default(), telemetry.clone())
                .unwrap(),
        );
        let subscriber =
            tracing_subscriber::registry().with(TriggerLayer::new(decoupler.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("not an error");
            tracing::error!("an error");
            tracing::error!(fatal = true, "a fatal error");
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(telemetry.snapshot().errors_observed, 2);
        assert_eq!(calls.0.load(Ordering::SeqCst), 2);
    }
}
