//! Log line and parsed entry event model.
//!
//! A `LogLine` is one line of raw child-process output after attribution and
//! level classification. A `ParsedEntry` is the structured event a framework
//! plugin extracted from one line (an SQL execution, an HTTP request, or an
//! exception); it always carries the id of the line it came from.

use crate::id::{Fingerprint, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level detected on a raw log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Classify a raw line by matching common level markers.
    ///
    /// Matches whole-word upper-case markers first (the common Rails/puma
    /// form), then bracketed lowercase forms; defaults to `Info`.
    pub fn classify(line: &str) -> Self {
        let upper = line.to_uppercase();
        for (needle, level) in [
            ("FATAL", LogLevel::Fatal),
            ("ERROR", LogLevel::Error),
            ("WARN", LogLevel::Warn),
            ("DEBUG", LogLevel::Debug),
            ("TRACE", LogLevel::Trace),
        ] {
            if upper.contains(needle) {
                return level;
            }
        }
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

/// A single attributed line of process output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Monotonically increasing id, assigned by the log pipeline.
    pub id: u64,
    /// Name of the process that produced the line.
    pub process: String,
    /// Raw text content (without the trailing newline).
    pub content: String,
    /// Detected severity level.
    pub level: LogLevel,
    /// Time the pipeline observed the line.
    pub timestamp: DateTime<Utc>,
}

/// An SQL execution observed in the logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlEvent {
    /// The statement text as logged.
    pub query: String,
    /// Reported execution duration in milliseconds.
    pub duration_ms: f64,
    /// Canonical shape of the statement.
    pub fingerprint: Fingerprint,
    /// Primary table the statement targets, when recognizable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Statement verb (`SELECT`, `INSERT`, `UPDATE`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// An HTTP request lifecycle event (started or completed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Response status; present only on completion lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Total duration; present only on completion lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Raw request parameters when a `Parameters:` line was attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

/// An exception with its accumulated backtrace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionEvent {
    /// Exception class name (e.g. `ActiveRecord::RecordNotFound`).
    pub exception_type: String,
    pub message: String,
    /// Backtrace frames in top-down order.
    pub backtrace: Vec<String>,
}

/// The structured payload a plugin extracted from a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedPayload {
    Sql(SqlEvent),
    Request(RequestEvent),
    Exception(ExceptionEvent),
}

/// A structured event produced by a framework plugin from one `LogLine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub process: String,
    /// Human-readable one-line summary.
    pub message: String,
    /// Request correlation id, when the line belongs to a tracked request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Id of the `LogLine` this entry was parsed from.
    pub source_line_id: u64,
    pub payload: ParsedPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_levels() {
        assert_eq!(LogLevel::classify("[ERROR] boom"), LogLevel::Error);
        assert_eq!(LogLevel::classify("WARN: low disk"), LogLevel::Warn);
        assert_eq!(LogLevel::classify("FATAL: dead"), LogLevel::Fatal);
        assert_eq!(LogLevel::classify("DEBUG noise"), LogLevel::Debug);
        assert_eq!(LogLevel::classify("plain output"), LogLevel::Info);
    }

    #[test]
    fn test_fatal_wins_over_error() {
        // A line carrying both markers takes the most severe.
        assert_eq!(
            LogLevel::classify("FATAL error in worker"),
            LogLevel::Fatal
        );
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
    }

    #[test]
    fn test_payload_serde_tagging() {
        let entry = ParsedPayload::Exception(ExceptionEvent {
            exception_type: "RuntimeError".into(),
            message: "boom".into(),
            backtrace: vec!["app/models/user.rb:10:in `find'".into()],
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"exception\""));
    }
}
