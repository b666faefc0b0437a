//! Captured log events
//!
//! A [`LogEvent`] is the owned form of a `tracing` event, suitable for
//! retaining in a context buffer and replaying later.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use tracing::field::{Field, Visit};

use crate::level::Severity;
use crate::redaction::Redactor;

/// Context key used when an event carries no trace or request identifier
pub const GLOBAL_CONTEXT: &str = "global";

/// An owned, replayable log event
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub target: String,
    pub message: String,
    /// Trace/request identifier, when one was found on the event or its spans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            severity,
            target: String::new(),
            message: message.into(),
            context_id: None,
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Logical context key: the context id if present, else [`GLOBAL_CONTEXT`]
    pub fn context_key(&self) -> &str {
        self.context_id.as_deref().unwrap_or(GLOBAL_CONTEXT)
    }

    /// Apply `redactor` to the message and every string field
    pub fn redact(&mut self, redactor: &Redactor) {
        if redactor.is_empty() {
            return;
        }

        if let Some(message) = redacted_copy(redactor, &self.message) {
            self.message = message;
        }

        for value in self.fields.values_mut() {
            if let serde_json::Value::String(s) = value {
                if let Some(redacted) = redacted_copy(redactor, s) {
                    *s = redacted;
                }
            }
        }
    }
}

/// Redacted text, or `None` when no rule changed it
fn redacted_copy(redactor: &Redactor, text: &str) -> Option<String> {
    match redactor.redact(text) {
        Cow::Owned(redacted) => Some(redacted),
        Cow::Borrowed(_) => None,
    }
}

/// Field visitor that turns a `tracing` event into message, context id and fields
pub(crate) struct EventVisitor<'a> {
    context_fields: &'a [String],
    pub message: Option<String>,
    pub context_id: Option<(usize, String)>,
    pub fatal: bool,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl<'a> EventVisitor<'a> {
    pub fn new(context_fields: &'a [String]) -> Self {
        Self {
            context_fields,
            message: None,
            context_id: None,
            fatal: false,
            fields: serde_json::Map::new(),
        }
    }

    /// Keep the highest-priority context field seen so far
    fn offer_context(&mut self, name: &str, value: &str) -> bool {
        let Some(rank) = self.context_fields.iter().position(|f| f == name) else {
            return false;
        };

        let replace = match &self.context_id {
            Some((current, _)) => rank < *current,
            None => true,
        };
        if replace {
            self.context_id = Some((rank, value.to_string()));
        }
        true
    }

    pub fn context_id(&self) -> Option<String> {
        self.context_id.as_ref().map(|(_, id)| id.clone())
    }
}

impl Visit for EventVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value_str = format!("{:?}", value);
        self.record_str(field, value_str.trim_matches('"'));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        let name = field.name();
        if name == "message" {
            self.message = Some(value.to_string());
            return;
        }
        if self.offer_context(name, value) {
            return;
        }
        self.fields
            .insert(name.to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "fatal" {
            self.fatal = value;
        }
        self.fields.insert(field.name().to_string(), value.into());
    }
}
