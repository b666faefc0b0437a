//! Pre-error context buffer
//!
//! Sub-error events are retained per logical context (trace or request id) in
//! small rings instead of being discarded by the level gate. When an
//! error-class event arrives for a context, everything retained for it is
//! replayed to the sink, oldest first, so the error shows up with the detail
//! that led to it.
//!
//! Locking: the registry lock covers lookup, creation and LRU bookkeeping
//! only. Each ring has its own lock. Evicted rings are cleared, and replay
//! happens, after the registry lock has been released.

mod context;
mod registry;
mod sink;

pub use context::ContextBuffer;
pub use registry::LruRegistry;
pub use sink::{EventSink, LineFormat, MemorySink, StreamSink};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::BufferConfig;
use crate::error::EscalationError;
use crate::event::LogEvent;
use crate::metrics::Telemetry;
use crate::redaction::SharedRedactor;

/// What [`PreErrorBuffer::admit`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmitOutcome {
    /// Sub-error event retained in its context's ring
    Buffered,
    /// Error-class event; this many retained events were replayed
    Flushed(usize),
    /// Buffer is shut down, nothing was done
    Ignored,
}

/// Point-in-time view of one context, most recent first in listings
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub context: String,
    pub retained: usize,
    pub idle_ms: u64,
}

pub struct PreErrorBuffer {
    registry: Mutex<LruRegistry<Arc<ContextBuffer>>>,
    capacity_per_context: usize,
    sink: Arc<dyn EventSink>,
    redactor: SharedRedactor,
    telemetry: Arc<Telemetry>,
    closed: AtomicBool,
}

impl PreErrorBuffer {
    pub fn new(
        config: &BufferConfig,
        sink: Arc<dyn EventSink>,
        redactor: SharedRedactor,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self, EscalationError> {
        if config.capacity_per_context == 0 {
            return Err(EscalationError::InvalidConfig(
                "buffer capacity per context must be greater than 0".to_string(),
            ));
        }
        if config.max_contexts == 0 {
            return Err(EscalationError::InvalidConfig(
                "buffer max contexts must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            registry: Mutex::new(LruRegistry::new(config.max_contexts)),
            capacity_per_context: config.capacity_per_context,
            sink,
            redactor,
            telemetry,
            closed: AtomicBool::new(false),
        })
    }

    /// Retain a sub-error event, or replay its context on an error-class event
    ///
    /// The error event itself is never buffered or replayed.
    pub fn admit(&self, event: LogEvent) -> AdmitOutcome {
        if self.closed.load(Ordering::Acquire) {
            return AdmitOutcome::Ignored;
        }

        let buffer = self.resolve(event.context_key());

        if event.severity.is_error() {
            let retained = buffer.drain();
            let count = retained.len();
            self.replay(retained);
            self.telemetry.record_flush(count as u64);
            return AdmitOutcome::Flushed(count);
        }

        match buffer.push(event) {
            Ok(()) => {}
            // Evicted between lookup and push; re-resolve once so the event lands
            // in the context's fresh ring
            Err(event) => {
                let buffer = self.resolve(event.context_key());
                if buffer.push(event).is_err() {
                    return AdmitOutcome::Ignored;
                }
            }
        }
        self.telemetry.record_buffered();
        AdmitOutcome::Buffered
    }

    /// Flush every context and stop accepting events
    ///
    /// Idempotent; returns the number of events replayed by this call.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let buffers = self.lock_registry().drain();

        let mut replayed = 0;
        for (_, buffer) in buffers {
            let retained = buffer.drain();
            if retained.is_empty() {
                continue;
            }
            let count = retained.len();
            self.replay(retained);
            self.telemetry.record_flush(count as u64);
            replayed += count;
        }

        tracing::debug!(replayed, "Pre-error buffer flushed on shutdown");
        replayed
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn context_count(&self) -> usize {
        self.lock_registry().len()
    }

    pub fn capacity_per_context(&self) -> usize {
        self.capacity_per_context
    }

    pub fn max_contexts(&self) -> usize {
        self.lock_registry().max_entries()
    }

    /// Events currently retained for `context`
    pub fn retained(&self, context: &str) -> usize {
        let buffer = self.lock_registry().get(context).cloned();
        buffer.map(|b| b.len()).unwrap_or(0)
    }

    /// Every live context, most recently used first
    pub fn contexts(&self) -> Vec<ContextSummary> {
        let buffers: Vec<Arc<ContextBuffer>> = {
            let registry = self.lock_registry();
            registry
                .keys()
                .iter()
                .filter_map(|key| registry.get(key).cloned())
                .collect()
        };

        buffers
            .iter()
            .map(|b| ContextSummary {
                context: b.key().to_string(),
                retained: b.len(),
                idle_ms: b.idle_ms(),
            })
            .collect()
    }

    /// Find or create the ring for `key`, marking it most recently used
    fn resolve(&self, key: &str) -> Arc<ContextBuffer> {
        let capacity = self.capacity_per_context;
        let (buffer, evicted) = self
            .lock_registry()
            .touch_or_insert(key, |key| Arc::new(ContextBuffer::new(key, capacity)));

        for (key, evicted) in evicted {
            let discarded = evicted.evict();
            self.telemetry.record_context_evicted();
            tracing::trace!(context = %key, discarded, "Evicted idle log context");
        }

        buffer
    }

    fn replay(&self, events: Vec<LogEvent>) {
        if events.is_empty() {
            return;
        }
        let redactor = self.redactor.load();
        for mut event in events {
            event.redact(&redactor);
            self.sink.write(&event);
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, LruRegistry<Arc<ContextBuffer>>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PreErrorBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
