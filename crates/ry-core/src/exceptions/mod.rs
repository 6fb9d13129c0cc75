//! Exception deduplication and tracking.
//!
//! Exceptions are grouped by fingerprint — the exception class plus the
//! file:line of the topmost backtrace frame — so a crash loop shows as one
//! record with a rising count rather than a flood. Resolving or ignoring a
//! record sets a flag; counts keep accruing so a "resolved" exception that
//! recurs is immediately visible.

use chrono::{DateTime, Utc};
use ry_common::log::ExceptionEvent;
use ry_common::ExceptionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Rough severity classification by exception class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ExceptionSeverity {
    /// Classify by class name. Programming errors rank above expected
    /// operational failures.
    pub fn classify(exception_type: &str) -> Self {
        match exception_type {
            t if t.contains("SyntaxError") || t.contains("LoadError") => {
                ExceptionSeverity::Critical
            }
            t if t.contains("NoMethodError")
                || t.contains("NameError")
                || t.contains("ArgumentError")
                || t.contains("TypeError")
                || t.contains("NilClass") =>
            {
                ExceptionSeverity::High
            }
            t if t.contains("Timeout") || t.contains("ConnectionError") || t.contains("Deadlock") => {
                ExceptionSeverity::Medium
            }
            t if t.contains("RecordNotFound") || t.contains("RoutingError") => {
                ExceptionSeverity::Low
            }
            _ => ExceptionSeverity::Medium,
        }
    }
}

/// One deduplicated exception group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub id: ExceptionId,
    /// `<type>@<file>:<line>` of the first frame.
    pub fingerprint: String,
    pub exception_type: String,
    pub message: String,
    pub severity: ExceptionSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub stack_trace: Vec<String>,
    pub process: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub resolved: bool,
    pub ignored: bool,
}

/// Split a Rails-style backtrace frame (`app/models/user.rb:10:in 'find'`)
/// into file and line.
fn frame_location(frame: &str) -> (Option<String>, Option<u32>) {
    let mut parts = frame.splitn(3, ':');
    let file = parts.next().map(|s| s.trim().to_string());
    let line = parts.next().and_then(|s| s.trim().parse().ok());
    (file.filter(|f| !f.is_empty()), line)
}

/// In-memory exception store.
pub struct ExceptionTracker {
    records: Mutex<HashMap<String, ExceptionRecord>>,
}

impl ExceptionTracker {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Record one occurrence, deduplicating by fingerprint. Returns the
    /// record id.
    pub fn record(&self, process: &str, event: &ExceptionEvent) -> ExceptionId {
        let first_frame = event.backtrace.first().map(String::as_str).unwrap_or("");
        let (file, line) = frame_location(first_frame);
        let fingerprint = format!(
            "{}@{}:{}",
            event.exception_type,
            file.as_deref().unwrap_or("unknown"),
            line.unwrap_or(0)
        );

        let now = Utc::now();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = records.get_mut(&fingerprint) {
            existing.count += 1;
            existing.last_seen = now;
            existing.message = event.message.clone();
            return existing.id.clone();
        }

        let id = ExceptionId::new();
        debug!(
            exception = %event.exception_type,
            fingerprint = %fingerprint,
            "new exception group"
        );
        records.insert(
            fingerprint.clone(),
            ExceptionRecord {
                id: id.clone(),
                fingerprint,
                exception_type: event.exception_type.clone(),
                severity: ExceptionSeverity::classify(&event.exception_type),
                message: event.message.clone(),
                file,
                line,
                stack_trace: event.backtrace.clone(),
                process: process.to_string(),
                count: 1,
                first_seen: now,
                last_seen: now,
                resolved: false,
                ignored: false,
            },
        );
        id
    }

    /// All records, most recent occurrence first.
    pub fn list(&self) -> Vec<ExceptionRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ExceptionRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all
    }

    /// Mark a record resolved. Returns whether the id matched.
    pub fn resolve(&self, id: &ExceptionId) -> bool {
        self.set_flag(id, |r| r.resolved = true)
    }

    /// Mark a record ignored. Returns whether the id matched.
    pub fn ignore(&self, id: &ExceptionId) -> bool {
        self.set_flag(id, |r| r.ignored = true)
    }

    fn set_flag(&self, id: &ExceptionId, apply: impl FnOnce(&mut ExceptionRecord)) -> bool {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match records.values_mut().find(|r| &r.id == id) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for ExceptionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom(message: &str) -> ExceptionEvent {
        ExceptionEvent {
            exception_type: "NoMethodError".to_string(),
            message: message.to_string(),
            backtrace: vec![
                "app/models/user.rb:42:in `find_name'".to_string(),
                "app/controllers/users_controller.rb:10:in `show'".to_string(),
            ],
        }
    }

    #[test]
    fn test_duplicate_exceptions_deduplicate() {
        let tracker = ExceptionTracker::new();
        let first = tracker.record("web", &boom("undefined method `name'"));
        let second = tracker.record("web", &boom("undefined method `name'"));
        assert_eq!(first, second);

        let all = tracker.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].count, 2);
        assert_eq!(all[0].file.as_deref(), Some("app/models/user.rb"));
        assert_eq!(all[0].line, Some(42));
    }

    #[test]
    fn test_different_location_is_new_group() {
        let tracker = ExceptionTracker::new();
        tracker.record("web", &boom("a"));
        let mut other = boom("b");
        other.backtrace[0] = "app/models/order.rb:7:in `total'".to_string();
        tracker.record("web", &other);
        assert_eq!(tracker.list().len(), 2);
    }

    #[test]
    fn test_resolve_keeps_counting() {
        let tracker = ExceptionTracker::new();
        let id = tracker.record("web", &boom("x"));
        assert!(tracker.resolve(&id));
        tracker.record("web", &boom("x"));
        let all = tracker.list();
        assert!(all[0].resolved);
        assert_eq!(all[0].count, 2);
    }

    #[test]
    fn test_unknown_id_flags_false() {
        let tracker = ExceptionTracker::new();
        assert!(!tracker.resolve(&ExceptionId::new()));
        assert!(!tracker.ignore(&ExceptionId::new()));
    }

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            ExceptionSeverity::classify("SyntaxError"),
            ExceptionSeverity::Critical
        );
        assert_eq!(
            ExceptionSeverity::classify("ActiveRecord::RecordNotFound"),
            ExceptionSeverity::Low
        );
        assert_eq!(
            ExceptionSeverity::classify("Net::ReadTimeout"),
            ExceptionSeverity::Medium
        );
    }

    #[test]
    fn test_clear() {
        let tracker = ExceptionTracker::new();
        tracker.record("web", &boom("x"));
        tracker.clear();
        assert!(tracker.list().is_empty());
    }
}
