//! Supervisor support types: snapshots, events, restart policy, line
//! assembly.

use chrono::{DateTime, Utc};
use ry_common::{ProcessDefinition, ProcessStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time view of one instance, handed to the host surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub definition: ProcessDefinition,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub restart_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_restart_at: Option<DateTime<Utc>>,
}

/// Restart backoff policy for `auto_restart` processes.
///
/// Exponential from `base` doubling to `max`; the attempt counter resets
/// after a run that survives `reset_after`. After `max_failures`
/// consecutive failures the supervisor gives up and leaves the instance
/// crashed.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub base: Duration,
    pub max: Duration,
    pub reset_after: Duration,
    pub max_failures: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
            max_failures: 10,
        }
    }
}

impl RestartPolicy {
    /// Backoff delay before the given (1-based) consecutive failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.max)
    }
}

/// Hooks the supervisor fans output and lifecycle changes into.
///
/// All callbacks must be non-blocking; they run on the instance's reader
/// task. Slow consumers must hand off to their own queues and drop there.
#[derive(Clone)]
pub struct OutputHooks {
    /// One complete line of output, post line-splitting.
    pub on_line: Arc<dyn Fn(&str, &str) + Send + Sync>,
    /// Raw chunk bytes, verbatim, for interactive console rendering.
    pub on_console: Arc<dyn Fn(&str, &[u8]) + Send + Sync>,
    /// Status transition.
    pub on_status: Arc<dyn Fn(&str, ProcessStatus) + Send + Sync>,
    /// Non-fatal per-process error (spawn failure detail, giving up).
    pub on_error: Arc<dyn Fn(&str, &str) + Send + Sync>,
}

impl OutputHooks {
    /// Hooks that discard everything.
    pub fn noop() -> Self {
        Self {
            on_line: Arc::new(|_, _| {}),
            on_console: Arc::new(|_, _| {}),
            on_status: Arc::new(|_, _| {}),
            on_error: Arc::new(|_, _| {}),
        }
    }
}

/// Reassembles complete lines from arbitrary chunk boundaries.
///
/// Splits on `\n`, tolerating `\r\n`; incomplete trailing bytes are
/// buffered until the next chunk (or flushed at EOF).
#[derive(Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the complete lines it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush whatever is buffered as a final partial line.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
