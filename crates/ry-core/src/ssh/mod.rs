//! SSH session manager: pool, cap, garbage collection, tunnels.
//!
//! Session state machine:
//!
//! ```text
//! connecting ──auth ok──▶ connected ─┐
//! connecting ──auth fail──▶ error    │ health sampling every 10 s
//! connected ◀──recovery── degraded/unhealthy
//! any ──close()──▶ disconnecting ──▶ disconnected
//! network drop ──auto-retry (≤ 3, exp backoff 1 s base)──▶ connecting | error
//! ```
//!
//! Invariants: at most `max_sessions` concurrent sessions (hard cap 10);
//! exactly one session per id; a probe runs on every connected session;
//! sessions disconnected for ten minutes are collected every five.

pub mod auth;
pub mod export;
pub mod health;
pub mod session;
pub mod tunnel;
pub mod types;

pub use session::SshSession;
pub use types::{
    SessionHealth, SessionLogLine, SessionSnapshot, SessionStatus, SshConfig, SshHooks,
    TunnelInfo, TunnelKind, TunnelSpec, TunnelStatus,
};

use ry_common::{Error, ExportFormat, Result, SessionId, SshServer, TunnelId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Stale-session sweep interval.
const GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Disconnected sessions older than this are collected.
const GC_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

struct SessionEntry {
    session: Arc<SshSession>,
    tunnels: Vec<tunnel::Tunnel>,
}

/// The pool of sessions.
pub struct SshSessionManager {
    config: SshConfig,
    hooks: SshHooks,
    sessions: Arc<AsyncMutex<HashMap<SessionId, SessionEntry>>>,
    gc_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SshSessionManager {
    pub fn new(config: SshConfig, hooks: SshHooks) -> Self {
        let manager = Self {
            config,
            hooks,
            sessions: Arc::new(AsyncMutex::new(HashMap::new())),
            gc_task: Mutex::new(None),
        };
        manager.spawn_gc();
        manager
    }

    fn spawn_gc(&self) {
        let sessions = Arc::clone(&self.sessions);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut map = sessions.lock().await;
                let stale: Vec<SessionId> = map
                    .iter()
                    .filter(|(_, entry)| {
                        entry
                            .session
                            .disconnected_for()
                            .map(|d| d >= GC_STALE_AFTER)
                            .unwrap_or(false)
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in stale {
                    debug!(session = %id, "collecting stale session");
                    map.remove(&id);
                }
            }
        });
        *self.gc_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Connect to a saved server. Enforces the session cap before dialing.
    pub async fn create_session(&self, server: SshServer) -> Result<SessionId> {
        {
            let map = self.sessions.lock().await;
            let live = map
                .values()
                .filter(|entry| entry.session.status() != SessionStatus::Disconnected)
                .count();
            if live >= self.config.max_sessions {
                return Err(Error::SessionLimitReached {
                    max: self.config.max_sessions,
                });
            }
        }

        let session = SshSession::new(server, self.config.clone(), self.hooks.clone());
        let id = session.id.clone();
        // Insert before dialing so `list` shows the connecting session;
        // remove again if the connect ultimately fails.
        self.sessions.lock().await.insert(
            id.clone(),
            SessionEntry {
                session: Arc::clone(&session),
                tunnels: Vec::new(),
            },
        );

        match session.connect().await {
            Ok(()) => {
                info!(session = %id, server = %session.server.name, "session established");
                Ok(id)
            }
            Err(err) => {
                self.sessions.lock().await.remove(&id);
                Err(err)
            }
        }
    }

    async fn get(&self, id: &SessionId) -> Result<Arc<SshSession>> {
        self.sessions
            .lock()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| Error::UnknownSession { id: id.to_string() })
    }

    /// Close a session; its tunnels die with it.
    pub async fn close_session(&self, id: &SessionId) -> Result<()> {
        let entry = {
            let mut map = self.sessions.lock().await;
            map.remove(id)
                .ok_or_else(|| Error::UnknownSession { id: id.to_string() })?
        };
        let mut entry = entry;
        for tunnel in entry.tunnels.iter_mut() {
            tunnel.close(&entry.session);
        }
        entry.session.close().await;
        Ok(())
    }

    pub async fn write(&self, id: &SessionId, bytes: &[u8]) -> Result<()> {
        self.get(id).await?.write(bytes).await
    }

    pub async fn resize(&self, id: &SessionId, rows: u16, cols: u16) -> Result<()> {
        self.get(id).await?.resize(rows, cols).await
    }

    /// Open a tunnel bound to the session.
    pub async fn create_tunnel(&self, id: &SessionId, spec: TunnelSpec) -> Result<TunnelId> {
        let session = self.get(id).await?;
        if !session.status().is_live() {
            return Err(Error::TunnelFailed(format!(
                "session {} is {}",
                id,
                session.status()
            )));
        }
        let tunnel = tunnel::Tunnel::open(&session, spec).await?;
        let tunnel_id = tunnel.info.id.clone();
        let mut map = self.sessions.lock().await;
        if let Some(entry) = map.get_mut(id) {
            entry.tunnels.push(tunnel);
        }
        Ok(tunnel_id)
    }

    pub async fn session_logs(&self, id: &SessionId) -> Result<Vec<SessionLogLine>> {
        Ok(self.get(id).await?.log_lines())
    }

    /// Render a session's captured output.
    pub async fn export_session(&self, id: &SessionId, format: ExportFormat) -> Result<String> {
        let lines = self.session_logs(id).await?;
        Ok(export::render(&lines, format))
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let map = self.sessions.lock().await;
        let mut all: Vec<SessionSnapshot> = map.values().map(|e| e.session.snapshot()).collect();
        all.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        all
    }

    /// Close everything.
    pub async fn shutdown(&self) {
        if let Some(task) = self.gc_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        let entries: Vec<SessionEntry> = {
            let mut map = self.sessions.lock().await;
            map.drain().map(|(_, entry)| entry).collect()
        };
        for mut entry in entries {
            for tunnel in entry.tunnels.iter_mut() {
                tunnel.close(&entry.session);
            }
            if entry.session.status() != SessionStatus::Disconnected {
                entry.session.close().await;
            }
        }
        info!("ssh manager shut down");
    }
}

impl Drop for SshSessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.gc_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(host: &str) -> SshServer {
        SshServer::new("test", host, "dev")
    }

    #[tokio::test]
    async fn test_unknown_session_operations_fail() {
        let manager = SshSessionManager::new(SshConfig::default(), SshHooks::noop());
        let ghost = SessionId::new();
        assert!(matches!(
            manager.write(&ghost, b"ls\n").await,
            Err(Error::UnknownSession { .. })
        ));
        assert!(matches!(
            manager.close_session(&ghost).await,
            Err(Error::UnknownSession { .. })
        ));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_session_behind() {
        let config = SshConfig {
            connect_timeout_secs: 1,
            max_retries: 0,
            ..Default::default()
        };
        let manager = SshSessionManager::new(config, SshHooks::noop());
        // Reserved TEST-NET address: nothing listens there.
        let result = manager.create_session(server("192.0.2.1")).await;
        assert!(result.is_err());
        assert!(manager.list().await.is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_export_format_round_trip() {
        // Export of an empty/unknown session errors rather than returning
        // an empty document.
        let manager = SshSessionManager::new(SshConfig::default(), SshHooks::noop());
        let ghost = SessionId::new();
        assert!(manager
            .export_session(&ghost, ExportFormat::Csv)
            .await
            .is_err());
        manager.shutdown().await;
    }
}
