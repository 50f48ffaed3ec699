//! Structured JSONL run log.
//!
//! One [`LogEntry`] per line. Required fields are `timestamp`, `trace_id`,
//! `level` and `event`; everything else is omitted when unset. Trace ids are
//! `<run_id>::<seq>` with a zero-padded, per-emitter sequence number.
//!
//! Events, in order of appearance: `run_start`, `iteration_start`,
//! `test_end`, `leak_detail`, `iteration_end`, `run_end`.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FixtureError;
use crate::failure::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Outcome of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Ignore,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            iteration: None,
            group: None,
            test: None,
            outcome: None,
            failure_kind: None,
            message: None,
            file: None,
            line: None,
            duration_ms: None,
            exit_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Set the group and test name.
    #[must_use]
    pub fn with_test(mut self, group: impl Into<String>, test: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self.test = Some(test.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_failure_kind(mut self, kind: FailureKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the source location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Writes [`LogEntry`] lines and assigns their trace ids.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Emitter writing to a new file at `path`.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(Box::new(std::io::BufWriter::new(file)), run_id))
    }

    #[must_use]
    pub fn to_writer(writer: Box<dyn Write>, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:03}", self.run_id, self.seq)
    }

    /// Start an entry with the next trace id.
    pub fn entry(&mut self, level: LogLevel, event: &str) -> LogEntry {
        let trace_id = self.next_trace_id();
        LogEntry::new(trace_id, level, event)
    }

    /// Write a populated entry.
    pub fn emit(&mut self, entry: &LogEntry) -> Result<(), FixtureError> {
        let line = entry.to_jsonl()?;
        writeln!(self.writer, "{line}")?;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Run id derived from the process id and start time.
#[must_use]
pub fn default_run_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("run-{}-{millis}", std::process::id())
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    // Approximate calendar fields; ordering and time of day are exact.
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CaptureBuffer;

    #[test]
    fn required_fields_only_by_default() {
        let entry = LogEntry::new("run-1::001", LogLevel::Info, "run_start");
        let json = entry.to_jsonl().expect("serialize");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "run_start");
        assert!(parsed.get("outcome").is_none());
        assert!(parsed.get("group").is_none());
    }

    #[test]
    fn builders_fill_optional_fields() {
        let entry = LogEntry::new("t", LogLevel::Error, "test_end")
            .with_test("heap", "leaks")
            .with_outcome(Outcome::Fail)
            .with_failure_kind(FailureKind::Leak)
            .with_location("suite.rs", 7)
            .with_duration_ms(2);
        let parsed: serde_json::Value =
            serde_json::from_str(&entry.to_jsonl().expect("serialize")).expect("parse");
        assert_eq!(parsed["outcome"], "fail");
        assert_eq!(parsed["failure_kind"], "leak");
        assert_eq!(parsed["group"], "heap");
        assert_eq!(parsed["line"], 7);
    }

    #[test]
    fn emitter_numbers_trace_ids() {
        let buffer = CaptureBuffer::new();
        let mut emitter = LogEmitter::to_writer(Box::new(buffer.clone()), "run-x");
        for event in ["run_start", "run_end"] {
            let entry = emitter.entry(LogLevel::Info, event);
            emitter.emit(&entry).expect("emit");
        }
        let text = buffer.contents();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["trace_id"], "run-x::001");
        assert_eq!(lines[1]["trace_id"], "run-x::002");
    }
}
