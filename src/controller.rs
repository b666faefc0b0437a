//! Verbosity controller
//!
//! Owns the live minimum-severity threshold. The threshold is a single atomic
//! read on every event; all transitions (escalate, extend, revert, shutdown)
//! happen under one mutex so a trigger racing a reversion for the same window
//! resolves deterministically.
//!
//! ```text
//!            trigger                      re-trigger (outside interval)
//!   Base ─────────────────▶ Escalated ◀──────────────┐
//!    ▲                          │  └──────────────────┘
//!    └──────── deadline ────────┘
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{EscalationConfig, EscalationMode, MAX_DURATION_SECONDS};
use crate::error::EscalationError;
use crate::level::{Severity, DEFAULT_BASE_LEVEL, DEFAULT_ESCALATED_LEVEL};
use crate::metrics::Telemetry;

/// Result of a [`VerbosityController::trigger`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Base → Escalated, a new window was opened
    Escalated,
    /// Window already open, deadline pushed out
    Extended,
    /// Window already open and the last trigger was too recent
    Skipped,
    /// Mode is not `Auto`, or the controller has been shut down
    Ignored,
}

/// Anything that can be asked to escalate verbosity
///
/// The trigger decoupler talks to the controller through this seam.
pub trait Escalate: Send + Sync + 'static {
    fn escalate(&self) -> TriggerOutcome;
}

/// Serializable view of the controller state
#[derive(Debug, Clone, Serialize)]
pub struct VerbosityStatus {
    pub mode: EscalationMode,
    pub base_level: Severity,
    pub escalated_level: Severity,
    pub current_level: Severity,
    pub escalated: bool,
    /// Time left in the current escalation window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

/// An open escalation window
struct EscalationWindow {
    started_at: Instant,
    deadline: Instant,
    last_trigger: Instant,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    window: Option<EscalationWindow>,
    /// Bumped whenever the reversion timer is (re)armed or cancelled
    generation: u64,
}

pub struct VerbosityController {
    mode: EscalationMode,
    base: Severity,
    escalated: Severity,
    duration: Duration,
    retrigger_interval: Duration,

    current: AtomicU8,
    is_escalated: AtomicBool,
    shut_down: AtomicBool,

    state: Mutex<ControllerState>,
    runtime: Handle,
    telemetry: Arc<Telemetry>,
    /// Handed to reversion timers so a torn-down controller is never revived
    this: Weak<Self>,
}

impl VerbosityController {
    /// Build a controller on the current tokio runtime
    pub fn new(
        config: &EscalationConfig,
        telemetry: Arc<Telemetry>,
    ) -> Result<Arc<Self>, EscalationError> {
        let runtime =
            Handle::try_current().map_err(|_| EscalationError::NoRuntime("reversion timer"))?;
        Self::with_runtime(config, telemetry, runtime)
    }

    /// Build a controller whose reversion timers run on `runtime`
    pub fn with_runtime(
        config: &EscalationConfig,
        telemetry: Arc<Telemetry>,
        runtime: Handle,
    ) -> Result<Arc<Self>, EscalationError> {
        if config.duration_seconds == 0 {
            return Err(EscalationError::InvalidConfig(
                "escalation duration must be greater than 0".to_string(),
            ));
        }
        if config.duration_seconds > MAX_DURATION_SECONDS {
            return Err(EscalationError::InvalidConfig(format!(
                "escalation duration must be at most {}s",
                MAX_DURATION_SECONDS
            )));
        }

        Ok(Self::build(
            config.mode,
            Severity::parse_or(&config.base_level, DEFAULT_BASE_LEVEL),
            Severity::parse_or(&config.escalated_level, DEFAULT_ESCALATED_LEVEL),
            config.duration(),
            config.retrigger_interval(),
            telemetry,
            runtime,
        ))
    }

    fn build(
        mode: EscalationMode,
        base: Severity,
        escalated: Severity,
        duration: Duration,
        retrigger_interval: Duration,
        telemetry: Arc<Telemetry>,
        runtime: Handle,
    ) -> Arc<Self> {
        let always_on = mode == EscalationMode::AlwaysOn;
        let initial = if always_on { escalated } else { base };
        telemetry.record_escalation_state(always_on);

        Arc::new_cyclic(|this| Self {
            mode,
            base,
            escalated,
            duration,
            retrigger_interval,
            current: AtomicU8::new(initial as u8),
            is_escalated: AtomicBool::new(always_on),
            shut_down: AtomicBool::new(false),
            state: Mutex::new(ControllerState::default()),
            runtime,
            telemetry,
            this: this.clone(),
        })
    }

    pub fn mode(&self) -> EscalationMode {
        self.mode
    }

    pub fn base_level(&self) -> Severity {
        self.base
    }

    pub fn escalated_level(&self) -> Severity {
        self.escalated
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Live minimum severity admitted to output
    #[inline]
    pub fn current_level(&self) -> Severity {
        Severity::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Whether an event of `severity` passes the live threshold
    #[inline]
    pub fn allows(&self, severity: Severity) -> bool {
        severity >= self.current_level()
    }

    pub fn is_escalated(&self) -> bool {
        match self.mode {
            EscalationMode::AlwaysOn => true,
            EscalationMode::Disabled => false,
            EscalationMode::Auto => self.is_escalated.load(Ordering::Acquire),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Escalate verbosity, or extend the open window
    pub fn trigger(&self) -> TriggerOutcome {
        if self.mode != EscalationMode::Auto || self.is_shut_down() {
            return TriggerOutcome::Ignored;
        }

        let mut state = self.lock_state();

        // Shutdown may have completed while we waited for the lock
        if self.is_shut_down() {
            return TriggerOutcome::Ignored;
        }

        let now = Instant::now();

        let inside_interval = state
            .window
            .as_ref()
            .map(|w| now.duration_since(w.last_trigger) < self.retrigger_interval);

        match inside_interval {
            None => {
                state.generation += 1;
                let deadline = now + self.duration;
                let timer = self.schedule_reversion(deadline, state.generation);
                state.window = Some(EscalationWindow {
                    started_at: now,
                    deadline,
                    last_trigger: now,
                    timer,
                });
                self.current.store(self.escalated as u8, Ordering::Release);
                self.is_escalated.store(true, Ordering::Release);
                drop(state);

                self.telemetry.record_trigger();
                self.telemetry.record_escalation_state(true);
                tracing::warn!(
                    from = %self.base,
                    to = %self.escalated,
                    duration_secs = self.duration.as_secs_f64(),
                    "Log verbosity escalated"
                );
                TriggerOutcome::Escalated
            }
            Some(true) => {
                drop(state);
                self.telemetry.record_skipped_trigger();
                TriggerOutcome::Skipped
            }
            Some(false) => {
                // Rearm: the new timer replaces the old one, never stacks
                state.generation += 1;
                let deadline = now + self.duration;
                let timer = self.schedule_reversion(deadline, state.generation);
                if let Some(window) = state.window.as_mut() {
                    std::mem::replace(&mut window.timer, timer).abort();
                    window.deadline = deadline;
                    window.last_trigger = now;
                }
                drop(state);

                self.telemetry.record_trigger();
                tracing::debug!(
                    duration_secs = self.duration.as_secs_f64(),
                    "Escalation window extended"
                );
                TriggerOutcome::Extended
            }
        }
    }

    /// Snapshot of mode, levels and remaining window
    pub fn status(&self) -> VerbosityStatus {
        let remaining_ms = self.lock_state().window.as_ref().map(|w| {
            w.deadline
                .saturating_duration_since(Instant::now())
                .as_millis() as u64
        });

        VerbosityStatus {
            mode: self.mode,
            base_level: self.base,
            escalated_level: self.escalated,
            current_level: self.current_level(),
            escalated: self.is_escalated(),
            remaining_ms,
        }
    }

    /// Cancel any pending reversion and ignore all later triggers
    ///
    /// Idempotent. An open window is closed and the threshold returns to the
    /// base level.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut state = self.lock_state();
        state.generation += 1;
        let window = state.window.take();
        if let Some(window) = &window {
            window.timer.abort();
            self.current.store(self.base as u8, Ordering::Release);
            self.is_escalated.store(false, Ordering::Release);
        }
        drop(state);

        if let Some(window) = window {
            self.telemetry
                .record_escalation_duration(window.started_at.elapsed());
            self.telemetry.record_escalation_state(false);
        }
        tracing::debug!("Verbosity controller shut down");
    }

    fn schedule_reversion(&self, deadline: Instant, generation: u64) -> JoinHandle<()> {
        let controller = self.this.clone();

        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(controller) = controller.upgrade() {
                controller.revert(generation);
            }
        })
    }

    /// Deadline reached: return to the base level if `generation` is still current
    fn revert(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation != generation || self.is_shut_down() {
            return;
        }
        let Some(window) = state.window.take() else {
            return;
        };
        self.current.store(self.base as u8, Ordering::Release);
        self.is_escalated.store(false, Ordering::Release);
        drop(state);

        let elapsed = window.started_at.elapsed();
        self.telemetry.record_escalation_duration(elapsed);
        self.telemetry.record_escalation_state(false);
        tracing::warn!(
            from = %self.escalated,
            to = %self.base,
            escalated_secs = elapsed.as_secs_f64(),
            "Log verbosity restored"
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Escalate for VerbosityController {
    fn escalate(&self) -> TriggerOutcome {
        self.trigger()
    }
}

impl Drop for VerbosityController {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(window) = state.window.take() {
            window.timer.abort();
        }
    }
}
