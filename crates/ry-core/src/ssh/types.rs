//! SSH session and tunnel data model.

use chrono::{DateTime, Utc};
use ry_common::{SessionId, TunnelId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Degraded,
    Unhealthy,
    Disconnecting,
    Disconnected,
    Error,
}

impl SessionStatus {
    /// Whether the session holds a live connection.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionStatus::Connected | SessionStatus::Degraded | SessionStatus::Unhealthy
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Degraded => "degraded",
            SessionStatus::Unhealthy => "unhealthy",
            SessionStatus::Disconnecting => "disconnecting",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Latency health summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionHealth {
    /// Moving average over the recent window, milliseconds.
    pub avg_ms: f64,
    /// Most recent sample, milliseconds.
    pub current_ms: f64,
    /// Total samples taken this connection.
    pub samples: u64,
    /// Consecutive missed probes.
    pub missed: u32,
}

/// Tunnel flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelKind {
    /// Listen locally, forward over the session.
    Local,
    /// Listen remotely, forward back here.
    Remote,
    /// SOCKS5 proxy on a local port.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Open,
    Closed,
    Error,
}

/// Tunnel request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub kind: TunnelKind,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// A live tunnel's host-facing view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub id: TunnelId,
    /// Owning session (lookup back-reference, not ownership).
    pub session_id: SessionId,
    pub kind: TunnelKind,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub status: TunnelStatus,
}

/// One line of captured session output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogLine {
    pub at: DateTime<Utc>,
    pub content: String,
}

/// Host-facing session view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub server_id: String,
    pub server_name: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub health: SessionHealth,
    pub tunnels: Vec<TunnelInfo>,
    pub log_lines: usize,
}

/// Event callbacks the manager fans session activity into. All must be
/// non-blocking.
#[derive(Clone)]
pub struct SshHooks {
    pub on_output: Arc<dyn Fn(&SessionId, &[u8]) + Send + Sync>,
    pub on_status: Arc<dyn Fn(&SessionId, SessionStatus) + Send + Sync>,
    pub on_health: Arc<dyn Fn(&SessionId, &SessionHealth) + Send + Sync>,
    pub on_disconnect: Arc<dyn Fn(&SessionId) + Send + Sync>,
}

impl SshHooks {
    pub fn noop() -> Self {
        Self {
            on_output: Arc::new(|_, _| {}),
            on_status: Arc::new(|_, _| {}),
            on_health: Arc::new(|_, _| {}),
            on_disconnect: Arc::new(|_| {}),
        }
    }
}

/// Manager tunables, seeded from the `[ssh]` config section.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub max_sessions: usize,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub keepalive_interval_secs: u64,
    pub max_log_entries: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            connect_timeout_secs: 10,
            max_retries: 3,
            retry_backoff_secs: 1,
            keepalive_interval_secs: 10,
            max_log_entries: 10_000,
        }
    }
}

impl From<&ry_config::SshSection> for SshConfig {
    fn from(section: &ry_config::SshSection) -> Self {
        Self {
            max_sessions: section.effective_max_sessions(),
            connect_timeout_secs: section.connection_timeout,
            max_retries: section.max_retries,
            retry_backoff_secs: section.retry_backoff,
            keepalive_interval_secs: section.keepalive_interval,
            max_log_entries: section.max_log_entries,
        }
    }
}
