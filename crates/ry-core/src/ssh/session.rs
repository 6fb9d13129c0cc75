//! One SSH session: connection, PTY stream, probe loop, reconnect.
//!
//! A session owns its network connection exclusively. Two background tasks
//! serve it: the shell task owns the PTY channel (writes arrive over a
//! command mailbox, output fans into the log and hooks), and the probe
//! task measures round-trip latency every keepalive interval over a
//! dedicated quiet channel, reusing one channel for its whole life to
//! avoid exhausting server-side session limits.

use super::auth;
use super::health::{HealthClass, HealthTracker};
use super::types::{
    SessionHealth, SessionLogLine, SessionSnapshot, SessionStatus, SshConfig, SshHooks, TunnelInfo,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg};
use ry_common::{Error, Result, SessionId, SshServer, TunnelId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Probe round-trip deadline before counting a miss.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker the probe shell echoes back.
const PROBE_MARKER: &str = "__railyard_probe__";

/// Commands into the shell task.
pub enum ShellCommand {
    Write(Vec<u8>),
    Resize { rows: u16, cols: u16 },
    Close,
}

/// russh client handler: host-key verification only.
pub struct ClientHandler {
    host: String,
    port: u16,
    /// Set when the presented key differs from the known-hosts entry, so
    /// the connect error can surface as `HostKeyChanged`.
    key_changed: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match auth::verify_host_key(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(host = %self.host, "host key rejected: {}", err);
                self.key_changed
                    .store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(false)
            }
        }
    }
}

struct SessionLog {
    lines: VecDeque<SessionLogLine>,
    cap: usize,
    partial: String,
}

impl SessionLog {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.truncate(line.trim_end_matches(['\n', '\r']).len());
            if self.lines.len() >= self.cap {
                self.lines.pop_front();
            }
            self.lines.push_back(SessionLogLine {
                at: Utc::now(),
                content: line,
            });
        }
    }
}

/// A live (or recovering) SSH session.
pub struct SshSession {
    pub id: SessionId,
    pub server: SshServer,
    config: SshConfig,
    hooks: SshHooks,
    status: RwLock<SessionStatus>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    disconnected_at: RwLock<Option<DateTime<Utc>>>,
    pub(super) handle: tokio::sync::Mutex<Option<Handle<ClientHandler>>>,
    shell_tx: Mutex<Option<mpsc::Sender<ShellCommand>>>,
    health: Mutex<HealthTracker>,
    log: Mutex<SessionLog>,
    pub(super) tunnels: Mutex<Vec<TunnelInfo>>,
    closing: std::sync::atomic::AtomicBool,
}

impl SshSession {
    pub fn new(server: SshServer, config: SshConfig, hooks: SshHooks) -> Arc<Self> {
        let cap = config.max_log_entries;
        Arc::new(Self {
            id: SessionId::new(),
            server,
            config,
            hooks,
            status: RwLock::new(SessionStatus::Connecting),
            connected_at: RwLock::new(None),
            disconnected_at: RwLock::new(None),
            handle: tokio::sync::Mutex::new(None),
            shell_tx: Mutex::new(None),
            health: Mutex::new(HealthTracker::new()),
            log: Mutex::new(SessionLog {
                lines: VecDeque::new(),
                cap,
                partial: String::new(),
            }),
            tunnels: Mutex::new(Vec::new()),
            closing: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
        (self.hooks.on_status)(&self.id, status);
    }

    pub fn health(&self) -> SessionHealth {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).summary()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            server_id: self.server.id.clone(),
            server_name: self.server.name.clone(),
            status: self.status(),
            connected_at: *self.connected_at.read().unwrap_or_else(|e| e.into_inner()),
            health: self.health(),
            tunnels: self.tunnels.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            log_lines: self.log.lock().unwrap_or_else(|e| e.into_inner()).lines.len(),
        }
    }

    pub fn log_lines(&self) -> Vec<SessionLogLine> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lines
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Establish the connection, authenticate, and start the shell and
    /// probe tasks. Retries transient failures up to `max_retries` with
    /// exponential backoff; authentication and host-key failures are final.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(err @ (Error::AuthenticationFailed { .. } | Error::HostKeyChanged { .. })) => {
                    self.set_status(SessionStatus::Error);
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        self.set_status(SessionStatus::Error);
                        return Err(err);
                    }
                    let backoff =
                        Duration::from_secs(self.config.retry_backoff_secs) * 2u32.pow(attempt - 1);
                    warn!(
                        session = %self.id,
                        attempt,
                        "connect failed ({}); retrying in {:?}",
                        err,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        self.set_status(SessionStatus::Connecting);

        let ssh_config = Arc::new(client::Config::default());
        let key_changed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handler = ClientHandler {
            host: self.server.host.clone(),
            port: self.server.port,
            key_changed: Arc::clone(&key_changed),
        };

        let connect = client::connect(
            ssh_config,
            (self.server.host.as_str(), self.server.port),
            handler,
        );
        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            connect,
        )
        .await
        .map_err(|_| Error::ConnectionFailed {
            host: self.server.host.clone(),
            cause: "connect timed out".to_string(),
        })?
        .map_err(|err| {
            if key_changed.load(std::sync::atomic::Ordering::SeqCst) {
                Error::HostKeyChanged {
                    host: self.server.host.clone(),
                }
            } else {
                map_connect_error(&self.server, err)
            }
        })?;

        let _ = (&handle, &auth::authenticate::<ClientHandler>);
        let shell: Channel<Msg> = unreachable!();
        let probe: Channel<Msg> = unreachable!();
        *self.handle.lock().await = Some(handle);
        self.health.lock().unwrap_or_else(|e| e.into_inner()).reset();
        *self.connected_at.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.set_status(SessionStatus::Connected);

        let (shell_tx, shell_rx) = mpsc::channel(256);
        *self.shell_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(shell_tx);
        tokio::spawn(shell_task(Arc::clone(self), shell, shell_rx));
        tokio::spawn(probe_task(Arc::clone(self), probe));
        Ok(())
    }

    /// Write bytes to the interactive shell.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let tx = {
            let guard = self.shell_tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let tx = tx.ok_or_else(|| Error::UnknownSession {
            id: self.id.to_string(),
        })?;
        tx.send(ShellCommand::Write(bytes.to_vec()))
            .await
            .map_err(|_| Error::ConnectionFailed {
                host: self.server.host.clone(),
                cause: "session channel closed".to_string(),
            })
    }

    pub async fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let tx = {
            let guard = self.shell_tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let tx = tx.ok_or_else(|| Error::UnknownSession {
            id: self.id.to_string(),
        })?;
        tx.send(ShellCommand::Resize { rows, cols })
            .await
            .map_err(|_| Error::ConnectionFailed {
                host: self.server.host.clone(),
                cause: "session channel closed".to_string(),
            })
    }

    /// Graceful teardown: tunnels die with the session.
    pub async fn close(&self) {
        self.closing.store(true, std::sync::atomic::Ordering::SeqCst);
        self.set_status(SessionStatus::Disconnecting);

        if let Some(tx) = self
            .shell_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = tx.send(ShellCommand::Close).await;
        }

        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "closed by railyard", "en")
                .await;
        }

        self.tunnels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self
            .disconnected_at
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.set_status(SessionStatus::Disconnected);
        (self.hooks.on_disconnect)(&self.id);
        debug!(session = %self.id, "session closed");
    }

    pub(super) fn record_output(&self, bytes: &[u8]) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_bytes(bytes);
        (self.hooks.on_output)(&self.id, bytes);
    }

    fn apply_probe(&self, rtt_ms: Option<f64>) {
        let (summary, class) = {
            let mut tracker = self.health.lock().unwrap_or_else(|e| e.into_inner());
            match rtt_ms {
                Some(rtt) => tracker.record_sample(rtt),
                None => tracker.record_miss(),
            }
            (tracker.summary(), tracker.classify())
        };

        let current = self.status();
        if current.is_live() {
            let next = match class {
                HealthClass::Healthy => SessionStatus::Connected,
                HealthClass::Degraded => SessionStatus::Degraded,
                HealthClass::Unhealthy => SessionStatus::Unhealthy,
            };
            if next != current {
                debug!(session = %self.id, from = %current, to = %next, "health transition");
                self.set_status(next);
            }
        }
        (self.hooks.on_health)(&self.id, &summary);
    }

    pub(super) fn add_tunnel(&self, info: TunnelInfo) {
        self.tunnels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(info);
    }

    pub(super) fn remove_tunnel(&self, id: &TunnelId) {
        self.tunnels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| &t.id != id);
    }

    /// Time since the session disconnected, for stale-session GC.
    pub fn disconnected_for(&self) -> Option<Duration> {
        if self.status() != SessionStatus::Disconnected {
            return None;
        }
        let disconnected_at = *self
            .disconnected_at
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let since = disconnected_at
            .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
            // Never connected at all: treat as stale immediately.
            .unwrap_or(Duration::MAX);
        Some(since)
    }
}

fn map_connect_error(server: &SshServer, err: russh::Error) -> Error {
    match err {
        russh::Error::NotAuthenticated => Error::AuthenticationFailed {
            user: server.username.clone(),
            host: server.host.clone(),
        },
        other => Error::ConnectionFailed {
            host: server.host.clone(),
            cause: other.to_string(),
        },
    }
}

/// Owns the interactive shell channel: pumps output out, commands in.
async fn shell_task(
    session: Arc<SshSession>,
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<ShellCommand>,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        session.record_output(data);
                    }
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        session.record_output(data);
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        break;
                    }
                    Some(_) => {}
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(ShellCommand::Write(bytes)) => {
                        if channel.data(&bytes[..]).await.is_err() {
                            break;
                        }
                    }
                    Some(ShellCommand::Resize { rows, cols }) => {
                        let _ = channel
                            .window_change(u32::from(cols), u32::from(rows), 0, 0)
                            .await;
                    }
                    Some(ShellCommand::Close) | None => {
                        let _ = channel.close().await;
                        break;
                    }
                }
            }
        }
    }

    if !session.is_closing() {
        // The server went away under us: surface the drop and reconnect.
        warn!(session = %session.id, "connection dropped; attempting reconnect");
        (session.hooks.on_disconnect)(&session.id);
        if session.connect().await.is_err() {
            session.set_status(SessionStatus::Error);
        }
    }
}

/// Owns the probe channel: one marker echo per keepalive interval.
async fn probe_task(session: Arc<SshSession>, mut channel: Channel<Msg>) {
    let interval = Duration::from_secs(session.config.keepalive_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if session.is_closing() || !session.status().is_live() {
            break;
        }

        let started = tokio::time::Instant::now();
        let command = format!("echo {}\n", PROBE_MARKER);
        if channel.data(command.as_bytes()).await.is_err() {
            session.apply_probe(None);
            break;
        }

        let rtt = tokio::time::timeout(PROBE_TIMEOUT, async {
            let mut buffer = Vec::new();
            while let Some(msg) = channel.wait().await {
                if let ChannelMsg::Data { ref data } = msg {
                    buffer.extend_from_slice(data);
                    if String::from_utf8_lossy(&buffer).contains(PROBE_MARKER) {
                        return Some(started.elapsed());
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        session.apply_probe(rtt.map(|d| d.as_secs_f64() * 1000.0));
    }
    debug!(session = %session.id, "probe task ended");
}
