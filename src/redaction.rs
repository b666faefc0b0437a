//! Pattern-based redaction of sensitive text
//!
//! Rules are compiled once, when the [`Redactor`] is built, and never edited
//! afterwards. Updating the rule set means building a new `Redactor` and
//! swapping it into the [`SharedRedactor`] cell.

use arc_swap::ArcSwap;
use regex::{NoExpand, Regex};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::RedactionConfig;
use crate::error::EscalationError;
use crate::metrics::Telemetry;

/// Hot-swappable handle to the active rule set
pub type SharedRedactor = Arc<ArcSwap<Redactor>>;

/// Ordered, immutable set of compiled redaction rules
#[derive(Debug)]
pub struct Redactor {
    rules: Vec<Regex>,
    marker: String,
    telemetry: Option<Arc<Telemetry>>,
}

impl Redactor {
    /// Compile every configured rule
    ///
    /// Malformed patterns are skipped with a warning, or rejected when
    /// `strict` is set.
    pub fn compile(config: &RedactionConfig) -> Result<Self, EscalationError> {
        let mut rules = Vec::with_capacity(config.rules.len());

        for pattern in &config.rules {
            match Regex::new(pattern) {
                Ok(regex) => rules.push(regex),
                Err(source) if config.strict => {
                    return Err(EscalationError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        pattern = %pattern,
                        error = %e,
                        "Skipping malformed redaction pattern"
                    );
                }
            }
        }

        Ok(Self {
            rules,
            marker: config.marker.clone(),
            telemetry: None,
        })
    }

    /// A rule set that never changes its input
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            marker: String::new(),
            telemetry: None,
        }
    }

    /// Count fail-open passes into `telemetry`
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn into_shared(self) -> SharedRedactor {
        Arc::new(ArcSwap::from_pointee(self))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order, replacing matches with the marker
    ///
    /// Returns the input untouched when there is nothing to do or when a rule
    /// fails while being applied.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.rules.is_empty() || text.is_empty() {
            return Cow::Borrowed(text);
        }

        let applied = panic::catch_unwind(AssertUnwindSafe(|| self.apply_rules(text)));

        match applied {
            Ok(redacted) => redacted,
            Err(_) => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_redaction_failure();
                }
                tracing::warn!(
                    rules = self.rules.len(),
                    "Redaction failed, passing text through unredacted"
                );
                Cow::Borrowed(text)
            }
        }
    }

    /// Like [`Redactor::redact`], passing an absent value through as absent
    pub fn redact_opt<'a>(&self, text: Option<&'a str>) -> Option<Cow<'a, str>> {
        text.map(|t| self.redact(t))
    }

    fn apply_rules<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut current = Cow::Borrowed(text);

        for rule in &self.rules {
            let replaced = match rule.replace_all(&current, NoExpand(&self.marker)) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                current = Cow::Owned(replaced);
            }
        }

        current
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::empty()
    }
}
