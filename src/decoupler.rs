//! Trigger decoupler
//!
//! Sits on the hot logging path. Error-class events become trigger signals on
//! a fixed-capacity broadcast ring; a single background task turns them into
//! [`Escalate::escalate`] calls. The producer side never waits: when the ring
//! is full the oldest pending signal is overwritten. Signals are idempotent,
//! so losing the oldest of several pending ones loses nothing.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::{TriggerConfig, MAX_QUEUE_CAPACITY};
use crate::controller::Escalate;
use crate::error::EscalationError;
use crate::level::Severity;
use crate::metrics::Telemetry;

/// Request to escalate, produced by an error-class event
#[derive(Debug, Clone, Copy)]
pub struct TriggerSignal {
    pub severity: Severity,
}

struct Consumer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TriggerDecoupler {
    sender: broadcast::Sender<TriggerSignal>,
    consumer: Mutex<Option<Consumer>>,
    closed: AtomicBool,
    grace: Duration,
    telemetry: Arc<Telemetry>,
}

impl TriggerDecoupler {
    /// Start the background consumer on the current tokio runtime
    ///
    /// The ring holds at least `queue_capacity` signals (rounded up to a
    /// power of two).
    pub fn spawn(
        target: Arc<dyn Escalate>,
        config: &TriggerConfig,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self, EscalationError> {
        if config.queue_capacity == 0 {
            return Err(EscalationError::InvalidConfig(
                "trigger queue capacity must be greater than 0".to_string(),
            ));
        }
        if config.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(EscalationError::InvalidConfig(format!(
                "trigger queue capacity must be at most {}",
                MAX_QUEUE_CAPACITY
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EscalationError::NoRuntime("trigger consumer"))?;

        let (sender, receiver) = broadcast::channel(config.queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task_telemetry = telemetry.clone();
        let handle = runtime.spawn(async move {
            let result = AssertUnwindSafe(consumer_task(target, receiver, stop_rx, task_telemetry))
                .catch_unwind()
                .await;
            if let Err(e) = result {
                tracing::warn!(panic = ?e, "Trigger consumer panicked");
            }
        });

        Ok(Self {
            sender,
            consumer: Mutex::new(Some(Consumer {
                stop: stop_tx,
                handle,
            })),
            closed: AtomicBool::new(false),
            grace: config.shutdown_grace(),
            telemetry,
        })
    }

    /// Observe an event's severity (non-blocking)
    pub fn on_event(&self, severity: Severity) {
        if !severity.is_error() || self.closed.load(Ordering::Acquire) {
            return;
        }

        self.telemetry.record_error_observed();
        // Only fails when the consumer is gone, which means we are shutting down
        let _ = self.sender.send(TriggerSignal { severity });
    }

    /// Signals enqueued but not yet consumed
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    /// Stop the consumer, waiting at most the configured grace period
    ///
    /// Idempotent. Pending signals are discarded; a consumer that does not stop
    /// in time is aborted and abandoned.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(Consumer { stop, mut handle }) = consumer else {
            return;
        };

        let _ = stop.send(());
        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(_) => tracing::debug!("Trigger consumer stopped"),
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "Trigger consumer did not stop in time, abandoning it"
                );
            }
        }
    }
}

impl Drop for TriggerDecoupler {
    fn drop(&mut self) {
        let consumer = self
            .consumer
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(consumer) = consumer {
            consumer.handle.abort();
        }
    }
}

/// Background consumer: one `escalate()` per received signal
async fn consumer_task(
    target: Arc<dyn Escalate>,
    mut receiver: broadcast::Receiver<TriggerSignal>,
    mut stop: oneshot::Receiver<()>,
    telemetry: Arc<Telemetry>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut stop => break,

            received = receiver.recv() => match received {
                Ok(signal) => fire(target.as_ref(), signal),
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    telemetry.record_signals_dropped(dropped);
                    tracing::debug!(dropped, "Coalesced trigger signals");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!("Trigger consumer task shutting down");
}

fn fire(target: &dyn Escalate, signal: TriggerSignal) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| target.escalate()));
    match result {
        Ok(outcome) => tracing::trace!(?outcome, severity = %signal.severity, "Trigger delivered"),
        Err(_) => tracing::warn!(severity = %signal.severity, "Escalation trigger panicked"),
    }
}
