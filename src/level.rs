//! Ordered severity levels
//!
//! `Severity` is the single ordering shared by the controller threshold, the
//! trigger decoupler and the pre-error buffer. It is `repr(u8)` so the live
//! threshold can be published through one atomic scalar.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Trace = 0,
    Debug = 1,
    Information = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
}

/// Events at or above this severity escalate verbosity and flush buffered context
pub const ERROR_THRESHOLD: Severity = Severity::Error;

/// Default level used when a configured base level cannot be parsed
pub const DEFAULT_BASE_LEVEL: Severity = Severity::Warning;

/// Default level used when a configured escalated level cannot be parsed
pub const DEFAULT_ESCALATED_LEVEL: Severity = Severity::Information;

impl Severity {
    /// Decode a value previously produced by `as u8`
    ///
    /// Out-of-range values saturate to `Fatal`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Information,
            3 => Self::Warning,
            4 => Self::Error,
            _ => Self::Fatal,
        }
    }

    /// Map a `tracing` level. `tracing` has no fatal level, see [`Severity::classify`].
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Information,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }

    /// Map a `tracing` level, promoting ERROR events flagged `fatal = true`
    pub fn classify(level: &tracing::Level, fatal: bool) -> Self {
        match Self::from_tracing(level) {
            Self::Error if fatal => Self::Fatal,
            other => other,
        }
    }

    /// Parse a configured level name, falling back to `default` when unparseable
    pub fn parse_or(name: &str, default: Severity) -> Self {
        match name.parse() {
            Ok(level) => level,
            Err(_) => {
                tracing::warn!(
                    level = %name,
                    fallback = %default,
                    "Unrecognized level name, using default"
                );
                default
            }
        }
    }

    pub fn is_error(self) -> bool {
        self >= ERROR_THRESHOLD
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity level: {0}")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "trce" | "verbose" => Ok(Self::Trace),
            "debug" | "dbg" => Ok(Self::Debug),
            "information" | "info" | "inf" => Ok(Self::Information),
            "warning" | "warn" | "wrn" => Ok(Self::Warning),
            "error" | "err" | "eror" => Ok(Self::Error),
            "fatal" | "ftl" | "crit" | "critical" => Ok(Self::Fatal),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}
