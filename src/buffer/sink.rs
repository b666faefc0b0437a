//! Destinations for replayed events

use std::io::{self, Write};
use std::sync::Mutex;

use crate::event::LogEvent;

/// Receives events replayed out of a context buffer
///
/// Called outside every buffer lock, possibly from several threads at once.
pub trait EventSink: Send + Sync {
    fn write(&self, event: &LogEvent);
}

/// Line layout used by [`StreamSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    Json,
    Text,
}

impl LineFormat {
    /// `"json"` selects JSON lines, anything else plain text
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Writes each replayed event as one line to an `io::Write`
pub struct StreamSink<W> {
    writer: Mutex<W>,
    format: LineFormat,
}

impl StreamSink<io::Stdout> {
    pub fn stdout(format: LineFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W, format: LineFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, writer: &mut W, event: &LogEvent) -> io::Result<()> {
        match self.format {
            LineFormat::Json => {
                serde_json::to_writer(&mut *writer, event)?;
                writeln!(writer)
            }
            LineFormat::Text => {
                write!(
                    writer,
                    "{} {:>11} {}: {}",
                    event.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    event.severity.as_str().to_uppercase(),
                    event.target,
                    event.message
                )?;
                if let Some(context_id) = &event.context_id {
                    write!(writer, " context_id={}", context_id)?;
                }
                for (name, value) in &event.fields {
                    match value {
                        serde_json::Value::String(s) => write!(writer, " {}={}", name, s)?,
                        other => write!(writer, " {}={}", name, other)?,
                    }
                }
                writeln!(writer, " replayed=true")
            }
        }
    }
}

impl<W: Write + Send> EventSink for StreamSink<W> {
    fn write(&self, event: &LogEvent) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Going through tracing here would feed the event straight back into the buffer
        if let Err(e) = self.write_line(&mut writer, event) {
            eprintln!("Warning: Failed to write replayed log event: {}", e);
        }
    }
}

/// Collects replayed events in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for MemorySink {
    fn write(&self, event: &LogEvent) {
        self.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Severity;

    #[test]
    fn test_json_lines() {
        let sink = StreamSink::new(Vec::new(), LineFormat::Json);
        sink.write(&LogEvent::new(Severity::Debug, "first").with_context("req-1"));
        sink.write(&LogEvent::new(Severity::Information, "second"));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "first");
        assert_eq!(lines[0]["context_id"], "req-1");
        assert_eq!(lines[1]["severity"], "Information");
    }

    #[test]
    fn test_text_line_includes_fields() {
        let sink = StreamSink::new(Vec::new(), LineFormat::Text);
        sink.write(
            &LogEvent::new(Severity::Debug, "cache miss")
                .with_target("app::cache")
                .with_context("req-9")
                .with_field("key", "user:1")
                .with_field("attempt", 3),
        );

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert!(output.contains("DEBUG app::cache: cache miss"));
        assert!(output.contains("context_id=req-9"));
        assert!(output.contains("key=user:1"));
        assert!(output.contains("attempt=3"));
        assert!(output.ends_with("replayed=true\n"));
    }

    #[test]
    fn test_line_format_from_name() {
        assert_eq!(LineFormat::from_name("JSON"), LineFormat::Json);
        assert_eq!(LineFormat::from_name("text"), LineFormat::Text);
        assert_eq!(LineFormat::from_name("pretty"), LineFormat::Text);
    }
}
