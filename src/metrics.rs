use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const TRIGGERS_TOTAL: &str = "adaptive_logging_triggers_total";
pub const TRIGGERS_SKIPPED_TOTAL: &str = "adaptive_logging_triggers_skipped_total";
pub const ERRORS_OBSERVED_TOTAL: &str = "adaptive_logging_errors_observed_total";
pub const SIGNALS_DROPPED_TOTAL: &str = "adaptive_logging_signals_dropped_total";
pub const EVENTS_BUFFERED_TOTAL: &str = "adaptive_logging_events_buffered_total";
pub const EVENTS_FLUSHED_TOTAL: &str = "adaptive_logging_events_flushed_total";
pub const FLUSHES_TOTAL: &str = "adaptive_logging_flushes_total";
pub const CONTEXTS_EVICTED_TOTAL: &str = "adaptive_logging_contexts_evicted_total";
pub const REDACTION_FAILURES_TOTAL: &str = "adaptive_logging_redaction_failures_total";
pub const ESCALATION_DURATION_SECONDS: &str = "adaptive_logging_escalation_duration_seconds";
pub const ESCALATED: &str = "adaptive_logging_escalated";

/// Install the Prometheus recorder and describe all metrics
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
pub fn init_metric_descriptions() {
    describe_counter!(TRIGGERS_TOTAL, "Escalations started or extended");
    describe_counter!(
        TRIGGERS_SKIPPED_TOTAL,
        "Triggers ignored because they arrived inside the re-trigger interval"
    );
    describe_counter!(ERRORS_OBSERVED_TOTAL, "Error-class events seen on the hot path");
    describe_counter!(
        SIGNALS_DROPPED_TOTAL,
        "Trigger signals coalesced away because the queue was full"
    );
    describe_counter!(EVENTS_BUFFERED_TOTAL, "Sub-error events retained for replay");
    describe_counter!(EVENTS_FLUSHED_TOTAL, "Retained events replayed downstream");
    describe_counter!(FLUSHES_TOTAL, "Context flush operations");
    describe_counter!(
        CONTEXTS_EVICTED_TOTAL,
        "Logical contexts evicted (with their retained events) by the LRU policy"
    );
    describe_counter!(
        REDACTION_FAILURES_TOTAL,
        "Redaction passes that failed open and returned the input unchanged"
    );
    describe_histogram!(
        ESCALATION_DURATION_SECONDS,
        "Length of completed escalation windows in seconds"
    );
    describe_gauge!(ESCALATED, "Whether verbosity is currently escalated (1) or not (0)");
}

/// Process-local mirror of the exported counters
///
/// Every increment goes to both the `metrics` facade and an atomic here, so
/// status endpoints and tests can read exact values without a recorder.
#[derive(Debug, Default)]
pub struct Telemetry {
    triggers: AtomicU64,
    skipped_triggers: AtomicU64,
    errors_observed: AtomicU64,
    signals_dropped: AtomicU64,
    events_buffered: AtomicU64,
    events_flushed: AtomicU64,
    flush_operations: AtomicU64,
    contexts_evicted: AtomicU64,
    redaction_failures: AtomicU64,
    escalations_completed: AtomicU64,
}

/// Point-in-time copy of [`Telemetry`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub triggers: u64,
    pub skipped_triggers: u64,
    pub errors_observed: u64,
    pub signals_dropped: u64,
    pub events_buffered: u64,
    pub events_flushed: u64,
    pub flush_operations: u64,
    pub contexts_evicted: u64,
    pub redaction_failures: u64,
    pub escalations_completed: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
        counter!(TRIGGERS_TOTAL).increment(1);
    }

    pub fn record_skipped_trigger(&self) {
        self.skipped_triggers.fetch_add(1, Ordering::Relaxed);
        counter!(TRIGGERS_SKIPPED_TOTAL).increment(1);
    }

    pub fn record_error_observed(&self) {
        self.errors_observed.fetch_add(1, Ordering::Relaxed);
        counter!(ERRORS_OBSERVED_TOTAL).increment(1);
    }

    pub fn record_signals_dropped(&self, count: u64) {
        self.signals_dropped.fetch_add(count, Ordering::Relaxed);
        counter!(SIGNALS_DROPPED_TOTAL).increment(count);
    }

    pub fn record_buffered(&self) {
        self.events_buffered.fetch_add(1, Ordering::Relaxed);
        counter!(EVENTS_BUFFERED_TOTAL).increment(1);
    }

    pub fn record_flush(&self, events: u64) {
        self.flush_operations.fetch_add(1, Ordering::Relaxed);
        self.events_flushed.fetch_add(events, Ordering::Relaxed);
        counter!(FLUSHES_TOTAL).increment(1);
        counter!(EVENTS_FLUSHED_TOTAL).increment(events);
    }

    pub fn record_context_evicted(&self) {
        self.contexts_evicted.fetch_add(1, Ordering::Relaxed);
        counter!(CONTEXTS_EVICTED_TOTAL).increment(1);
    }

    pub fn record_redaction_failure(&self) {
        self.redaction_failures.fetch_add(1, Ordering::Relaxed);
        counter!(REDACTION_FAILURES_TOTAL).increment(1);
    }

    pub fn record_escalation_state(&self, escalated: bool) {
        gauge!(ESCALATED).set(if escalated { 1.0 } else { 0.0 });
    }

    pub fn record_escalation_duration(&self, duration: Duration) {
        self.escalations_completed.fetch_add(1, Ordering::Relaxed);
        histogram!(ESCALATION_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            triggers: self.triggers.load(Ordering::Relaxed),
            skipped_triggers: self.skipped_triggers.load(Ordering::Relaxed),
            errors_observed: self.errors_observed.load(Ordering::Relaxed),
            signals_dropped: self.signals_dropped.load(Ordering::Relaxed),
            events_buffered: self.events_buffered.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            flush_operations: self.flush_operations.load(Ordering::Relaxed),
            contexts_evicted: self.contexts_evicted.load(Ordering::Relaxed),
            redaction_failures: self.redaction_failures.load(Ordering::Relaxed),
            escalations_completed: self.escalations_completed.load(Ordering::Relaxed),
        }
    }
}
