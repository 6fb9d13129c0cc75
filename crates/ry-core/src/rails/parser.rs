//! Rails development-log parser.
//!
//! Turns the familiar line shapes into structured entries:
//!
//! ```text
//! Started GET "/users" for 127.0.0.1 at 2026-01-15 14:30:22 +0000
//! Processing by UsersController#index as HTML
//!   Parameters: {"page"=>"2"}
//!   User Load (1.1ms)  SELECT "users".* FROM "users" WHERE "users"."id" = $1
//! Completed 200 OK in 23ms (Views: 12.1ms | ActiveRecord: 7.7ms)
//! ```
//!
//! plus exception blocks (`NoMethodError (undefined method 'x'):` followed
//! by indented backtrace frames).
//!
//! Because lines from multiple processes interleave, request correlation is
//! held per process name. A request that never sees its `Completed` line is
//! dropped from correlation after 60 s of inactivity.

use crate::query::fingerprint;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use ry_common::log::{ExceptionEvent, RequestEvent, SqlEvent};
use ry_common::{LogLevel, LogLine, ParsedEntry, ParsedPayload, RequestId};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

/// Inactivity window after which request correlation is abandoned.
pub const REQUEST_IDLE_TIMEOUT_SECS: i64 = 60;

static STARTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^Started (GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS) "([^"]+)" for \S+"#)
        .expect("started regex")
});

static PROCESSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Processing by ([A-Za-z0-9_:]+)#(\w+) as (\w+)").expect("processing regex")
});

static PARAMETERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Parameters: (\{.*\})\s*$").expect("parameters regex"));

static COMPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Completed (\d{3}) .*? in (\d+(?:\.\d+)?)ms").expect("completed regex")
});

static SQL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\((\d+(?:\.\d+)?)ms\)\s+((?:SELECT|INSERT|UPDATE|DELETE|CREATE|ALTER|DROP|TRUNCATE)\b.*)$",
    )
    .expect("sql line regex")
});

static EXCEPTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Za-z0-9_]*(?:::[A-Z][A-Za-z0-9_]*)*) \((.*)\):\s*$")
        .expect("exception header regex")
});

static BACKTRACE_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(?:from )?(\S+\.rb:\d+:in .*|\S+\.rb:\d+)$").expect("backtrace frame regex")
});

struct ActiveRequest {
    id: RequestId,
    method: String,
    path: String,
    controller: Option<String>,
    action: Option<String>,
    params: Option<String>,
    last_activity: DateTime<Utc>,
}

struct PendingException {
    exception_type: String,
    message: String,
    frames: Vec<String>,
}

#[derive(Default)]
struct ProcessState {
    request: Option<ActiveRequest>,
    exception: Option<PendingException>,
}

/// Stateful parser; one instance serves all processes, correlation keyed by
/// process name.
pub struct RailsLogParser {
    states: Mutex<HashMap<String, ProcessState>>,
}

impl RailsLogParser {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Parse one line. See the module docs for the recognized shapes.
    pub fn parse(&self, line: &LogLine) -> Vec<ParsedEntry> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(line.process.clone()).or_default();

        // Stale request correlation is abandoned, not completed: without a
        // Completed line there is no status to report.
        if let Some(ref request) = state.request {
            let cutoff = Utc::now() - ChronoDuration::seconds(REQUEST_IDLE_TIMEOUT_SECS);
            if request.last_activity < cutoff {
                state.request = None;
            }
        }

        let mut entries = Vec::new();

        // A buffered backtrace flushes when a non-frame line arrives.
        if state.exception.is_some() {
            if let Some(caps) = BACKTRACE_FRAME.captures(&line.content) {
                if let Some(pending) = state.exception.as_mut() {
                    pending.frames.push(caps[1].trim().to_string());
                }
                return entries;
            }
            if let Some(pending) = state.exception.take() {
                entries.push(Self::exception_entry(line, state, pending));
            }
        }

        if let Some(caps) = EXCEPTION_HEADER.captures(&line.content) {
            state.exception = Some(PendingException {
                exception_type: caps[1].to_string(),
                message: caps[2].to_string(),
                frames: Vec::new(),
            });
            return entries;
        }

        if let Some(caps) = STARTED.captures(&line.content) {
            let request = ActiveRequest {
                id: RequestId::new(),
                method: caps[1].to_string(),
                path: caps[2].to_string(),
                controller: None,
                action: None,
                params: None,
                last_activity: line.timestamp,
            };
            entries.push(ParsedEntry {
                timestamp: line.timestamp,
                level: line.level,
                process: line.process.clone(),
                message: format!("Started {} {}", request.method, request.path),
                request_id: Some(request.id.clone()),
                source_line_id: line.id,
                payload: ParsedPayload::Request(RequestEvent {
                    method: request.method.clone(),
                    path: request.path.clone(),
                    controller: None,
                    action: None,
                    status: None,
                    duration_ms: None,
                    params: None,
                }),
            });
            state.request = Some(request);
            return entries;
        }

        if let Some(caps) = PROCESSING.captures(&line.content) {
            if let Some(request) = state.request.as_mut() {
                request.controller = Some(caps[1].to_string());
                request.action = Some(caps[2].to_string());
                request.last_activity = line.timestamp;
            }
            return entries;
        }

        if let Some(caps) = PARAMETERS.captures(&line.content) {
            if let Some(request) = state.request.as_mut() {
                request.params = Some(caps[1].to_string());
                request.last_activity = line.timestamp;
            }
            return entries;
        }

        if let Some(caps) = COMPLETED.captures(&line.content) {
            if let Some(request) = state.request.take() {
                let status: u16 = caps[1].parse().unwrap_or(0);
                let duration_ms: f64 = caps[2].parse().unwrap_or(0.0);
                entries.push(ParsedEntry {
                    timestamp: line.timestamp,
                    level: line.level,
                    process: line.process.clone(),
                    message: format!(
                        "Completed {} {} {} in {}ms",
                        request.method, request.path, status, duration_ms
                    ),
                    request_id: Some(request.id.clone()),
                    source_line_id: line.id,
                    payload: ParsedPayload::Request(RequestEvent {
                        method: request.method,
                        path: request.path,
                        controller: request.controller,
                        action: request.action,
                        status: Some(status),
                        duration_ms: Some(duration_ms),
                        params: request.params,
                    }),
                });
            }
            return entries;
        }

        if let Some(caps) = SQL_LINE.captures(&line.content) {
            let duration_ms: f64 = caps[1].parse().unwrap_or(0.0);
            let query = caps[2].trim().to_string();
            let request_id = state.request.as_mut().map(|request| {
                request.last_activity = line.timestamp;
                request.id.clone()
            });
            entries.push(ParsedEntry {
                timestamp: line.timestamp,
                level: line.level,
                process: line.process.clone(),
                message: format!("SQL ({}ms)", duration_ms),
                request_id,
                source_line_id: line.id,
                payload: ParsedPayload::Sql(SqlEvent {
                    fingerprint: fingerprint::fingerprint(&query),
                    table: fingerprint::extract_table(&query).map(|t| t.to_lowercase()),
                    operation: fingerprint::extract_operation(&query),
                    query,
                    duration_ms,
                }),
            });
        }

        entries
    }

    fn exception_entry(
        line: &LogLine,
        state: &ProcessState,
        pending: PendingException,
    ) -> ParsedEntry {
        ParsedEntry {
            timestamp: line.timestamp,
            level: LogLevel::Error,
            process: line.process.clone(),
            message: format!("{}: {}", pending.exception_type, pending.message),
            request_id: state.request.as_ref().map(|r| r.id.clone()),
            source_line_id: line.id,
            payload: ParsedPayload::Exception(ExceptionEvent {
                exception_type: pending.exception_type,
                message: pending.message,
                backtrace: pending.frames,
            }),
        }
    }
}

impl Default for RailsLogParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(process: &str, id: u64, content: &str) -> LogLine {
        LogLine {
            id,
            process: process.to_string(),
            content: content.to_string(),
            level: LogLevel::classify(content),
            timestamp: Utc::now(),
        }
    }

    fn feed(parser: &RailsLogParser, process: &str, lines: &[&str]) -> Vec<ParsedEntry> {
        lines
            .iter()
            .enumerate()
            .flat_map(|(i, content)| parser.parse(&line(process, i as u64, content)))
            .collect()
    }

    #[test]
    fn test_request_lifecycle() {
        let parser = RailsLogParser::new();
        let entries = feed(
            &parser,
            "web",
            &[
                r#"Started GET "/users" for 127.0.0.1 at 2026-01-15 14:30:22 +0000"#,
                "Processing by UsersController#index as HTML",
                r#"  Parameters: {"page"=>"2"}"#,
                "Completed 200 OK in 23ms (Views: 12.1ms | ActiveRecord: 7.7ms)",
            ],
        );
        assert_eq!(entries.len(), 2);

        let ParsedPayload::Request(ref started) = entries[0].payload else {
            panic!("expected request payload");
        };
        assert_eq!(started.method, "GET");
        assert_eq!(started.path, "/users");
        assert!(started.status.is_none());

        let ParsedPayload::Request(ref completed) = entries[1].payload else {
            panic!("expected request payload");
        };
        assert_eq!(completed.status, Some(200));
        assert_eq!(completed.duration_ms, Some(23.0));
        assert_eq!(completed.controller.as_deref(), Some("UsersController"));
        assert_eq!(completed.action.as_deref(), Some("index"));
        assert_eq!(completed.params.as_deref(), Some(r#"{"page"=>"2"}"#));

        // Same correlation id across the lifecycle.
        assert_eq!(entries[0].request_id, entries[1].request_id);
    }

    #[test]
    fn test_sql_attributed_to_open_request() {
        let parser = RailsLogParser::new();
        let entries = feed(
            &parser,
            "web",
            &[
                r#"Started GET "/users" for 127.0.0.1 at 2026-01-15 14:30:22 +0000"#,
                r#"  User Load (1.1ms)  SELECT "users".* FROM "users" WHERE "users"."id" = $1"#,
            ],
        );
        assert_eq!(entries.len(), 2);
        let ParsedPayload::Sql(ref sql) = entries[1].payload else {
            panic!("expected sql payload");
        };
        assert_eq!(sql.duration_ms, 1.1);
        assert!(sql.query.starts_with("SELECT"));
        assert_eq!(sql.table.as_deref(), Some("users"));
        assert_eq!(sql.operation.as_deref(), Some("SELECT"));
        assert_eq!(entries[1].request_id, entries[0].request_id);
    }

    #[test]
    fn test_sql_without_request_has_no_correlation() {
        let parser = RailsLogParser::new();
        let entries = feed(
            &parser,
            "worker",
            &[r#"  SQL (0.4ms)  UPDATE "jobs" SET "state" = 'done' WHERE "jobs"."id" = 7"#],
        );
        assert_eq!(entries.len(), 1);
        assert!(entries[0].request_id.is_none());
    }

    #[test]
    fn test_correlation_is_per_process() {
        let parser = RailsLogParser::new();
        parser.parse(&line(
            "web",
            0,
            r#"Started GET "/users" for 127.0.0.1 at 2026-01-15 14:30:22 +0000"#,
        ));
        let worker_sql = parser.parse(&line(
            "worker",
            1,
            r#"  SQL (0.2ms)  SELECT "jobs".* FROM "jobs" WHERE "jobs"."id" = 1"#,
        ));
        assert!(worker_sql[0].request_id.is_none());
    }

    #[test]
    fn test_exception_block_accumulates_frames() {
        let parser = RailsLogParser::new();
        let entries = feed(
            &parser,
            "web",
            &[
                "NoMethodError (undefined method `name' for nil):",
                "  app/models/user.rb:42:in `find_name'",
                "  app/controllers/users_controller.rb:10:in `show'",
                "Some unrelated line",
            ],
        );
        assert_eq!(entries.len(), 1);
        let ParsedPayload::Exception(ref ex) = entries[0].payload else {
            panic!("expected exception payload");
        };
        assert_eq!(ex.exception_type, "NoMethodError");
        assert_eq!(ex.backtrace.len(), 2);
        assert!(ex.backtrace[0].starts_with("app/models/user.rb:42"));
        assert_eq!(entries[0].level, LogLevel::Error);
    }

    #[test]
    fn test_exception_flush_on_completed_keeps_both() {
        let parser = RailsLogParser::new();
        let entries = feed(
            &parser,
            "web",
            &[
                r#"Started GET "/users/1" for 127.0.0.1 at 2026-01-15 14:30:22 +0000"#,
                "ActiveRecord::RecordNotFound (Couldn't find User with 'id'=1):",
                "  app/controllers/users_controller.rb:10:in `show'",
                "Completed 404 Not Found in 5ms",
            ],
        );
        // Started, flushed exception, completed
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[1].payload, ParsedPayload::Exception(_)));
        assert!(matches!(entries[2].payload, ParsedPayload::Request(_)));
        // The exception is attributed to the open request.
        assert_eq!(entries[1].request_id, entries[0].request_id);
    }

    #[test]
    fn test_namespaced_exception_type() {
        let parser = RailsLogParser::new();
        let entries = feed(
            &parser,
            "web",
            &[
                "ActiveRecord::ConnectionTimeoutError (could not obtain a connection):",
                "  lib/pool.rb:90:in `checkout'",
                "",
            ],
        );
        let ParsedPayload::Exception(ref ex) = entries[0].payload else {
            panic!("expected exception payload");
        };
        assert_eq!(ex.exception_type, "ActiveRecord::ConnectionTimeoutError");
    }

    #[test]
    fn test_plain_lines_produce_nothing() {
        let parser = RailsLogParser::new();
        let entries = feed(&parser, "web", &["Booting Puma", "* Listening on tcp://0.0.0.0:3000"]);
        assert!(entries.is_empty());
    }
}
