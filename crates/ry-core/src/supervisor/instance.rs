//! Per-instance runtime: child backends and the supervise loop.
//!
//! Each started instance owns a child process behind one of two backends:
//! a pseudo-terminal (interactive processes, ANSI output) or plain pipes.
//! A single async task per instance drives spawn → stream → exit →
//! restart-or-settle, updating status and pid atomically under one lock.

use super::types::{InstanceSnapshot, LineAssembler, OutputHooks, RestartPolicy};
use crate::pty::PtyHandle;
use chrono::{DateTime, Utc};
use ry_common::{Error, ProcessDefinition, ProcessStatus, Result};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Deadline for one spawn attempt.
const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace between SIGTERM and SIGKILL on `stop`.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const PIPE_READ_BUFFER: usize = 8 * 1024;

/// A live child, PTY-backed or pipe-backed.
pub enum Backend {
    Pty(Arc<PtyHandle>),
    Pipes(PipesBackend),
}

/// Pipe-backed child via `tokio::process`.
pub struct PipesBackend {
    child: Mutex<tokio::process::Child>,
    stdin: tokio::sync::Mutex<Option<tokio::process::ChildStdin>>,
    pid: Option<u32>,
}

impl Backend {
    /// Spawn the definition's command, returning the backend and its raw
    /// output chunk stream.
    pub async fn spawn(def: &ProcessDefinition) -> Result<(Backend, mpsc::Receiver<Vec<u8>>)> {
        let spawn = async {
            if def.use_pty {
                let owned = def.clone();
                let handle = tokio::task::spawn_blocking(move || PtyHandle::spawn(&owned))
                    .await
                    .map_err(|err| Error::SpawnFailed {
                        name: def.name.clone(),
                        cause: err.to_string(),
                    })??;
                let chunks = handle.take_chunks().ok_or_else(|| Error::SpawnFailed {
                    name: def.name.clone(),
                    cause: "pty chunk stream unavailable".to_string(),
                })?;
                Ok::<_, Error>((Backend::Pty(Arc::new(handle)), chunks))
            } else {
                Self::spawn_pipes(def)
            }
        };

        tokio::time::timeout(SPAWN_TIMEOUT, spawn)
            .await
            .map_err(|_| Error::SpawnFailed {
                name: def.name.clone(),
                cause: format!("spawn timed out after {:?}", SPAWN_TIMEOUT),
            })?
    }

    fn spawn_pipes(def: &ProcessDefinition) -> Result<(Backend, mpsc::Receiver<Vec<u8>>)> {
        let mut cmd = tokio::process::Command::new(&def.command);
        cmd.args(&def.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = def.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &def.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|err| Error::SpawnFailed {
            name: def.name.clone(),
            cause: err.to_string(),
        })?;
        let pid = child.id();

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(256);
        if let Some(stdout) = child.stdout.take() {
            spawn_pipe_reader(stdout, chunk_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pipe_reader(stderr, chunk_tx);
        }
        let stdin = child.stdin.take();

        Ok((
            Backend::Pipes(PipesBackend {
                child: Mutex::new(child),
                stdin: tokio::sync::Mutex::new(stdin),
                pid,
            }),
            chunk_rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Backend::Pty(handle) => handle.pid(),
            Backend::Pipes(pipes) => pipes.pid,
        }
    }

    /// Write bytes to the child's stdin / terminal.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        match self {
            Backend::Pty(handle) => handle.write(bytes),
            Backend::Pipes(pipes) => {
                let mut guard = pipes.stdin.lock().await;
                let stdin = guard.as_mut().ok_or(Error::AlreadyClosed)?;
                stdin.write_all(bytes).await?;
                stdin.flush().await?;
                Ok(())
            }
        }
    }

    /// Resize the terminal. A no-op for pipe-backed children.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        match self {
            Backend::Pty(handle) => handle.resize(rows, cols),
            Backend::Pipes(_) => Ok(()),
        }
    }

    pub fn signal_term(&self) {
        let Some(pid) = self.pid() else { return };
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = pid;
    }

    pub fn kill(&self) {
        match self {
            Backend::Pty(handle) => {
                if let Some(pid) = handle.pid() {
                    #[cfg(unix)]
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    let _ = pid;
                }
            }
            Backend::Pipes(pipes) => {
                let mut child = pipes.child.lock().unwrap_or_else(|e| e.into_inner());
                let _ = child.start_kill();
            }
        }
    }

    pub fn try_wait(&self) -> Option<i32> {
        match self {
            Backend::Pty(handle) => handle.try_wait(),
            Backend::Pipes(pipes) => {
                let mut child = pipes.child.lock().unwrap_or_else(|e| e.into_inner());
                match child.try_wait() {
                    Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
                    _ => None,
                }
            }
        }
    }

    /// Await the child's exit code.
    pub async fn wait_exit(&self) -> Option<i32> {
        loop {
            if let Some(code) = self.try_wait() {
                return Some(code);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn spawn_pipe_reader(
    mut pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    tx: mpsc::Sender<Vec<u8>>,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; PIPE_READ_BUFFER];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

struct InstanceState {
    status: ProcessStatus,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    restart_attempts: u32,
    last_restart_at: Option<DateTime<Utc>>,
}

/// One supervised process: immutable definition plus mutable runtime state.
pub struct Instance {
    pub def: ProcessDefinition,
    state: Mutex<InstanceState>,
    backend: Mutex<Option<Arc<Backend>>>,
    stop_requested: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Instance {
    pub fn new(def: ProcessDefinition) -> Self {
        Self {
            def,
            state: Mutex::new(InstanceState {
                status: ProcessStatus::Idle,
                pid: None,
                started_at: None,
                exit_code: None,
                restart_attempts: 0,
                last_restart_at: None,
            }),
            backend: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        InstanceSnapshot {
            definition: self.def.clone(),
            status: state.status,
            pid: state.pid,
            started_at: state.started_at,
            exit_code: state.exit_code,
            restart_attempts: state.restart_attempts,
            last_restart_at: state.last_restart_at,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    pub fn backend(&self) -> Option<Arc<Backend>> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_status(&self, status: ProcessStatus, hooks: &OutputHooks) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.status = status;
        }
        (hooks.on_status)(&self.def.name, status);
    }

    /// Begin supervising. The caller has already verified the instance is
    /// startable and set `Starting`.
    pub fn launch(self: &Arc<Self>, hooks: OutputHooks, policy: RestartPolicy) {
        self.stop_requested.store(false, Ordering::SeqCst);
        let instance = Arc::clone(self);
        let task = tokio::spawn(async move {
            run_instance(instance, hooks, policy).await;
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Request a stop: SIGTERM, 5 s grace, SIGKILL. The supervise loop
    /// observes the exit and settles the state to `Stopped`.
    pub async fn stop(&self, hooks: &OutputHooks) -> Result<()> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.status.has_pid() {
                return Err(Error::NotRunning {
                    name: self.def.name.clone(),
                });
            }
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        self.set_status(ProcessStatus::Stopping, hooks);

        let Some(backend) = self.backend() else {
            return Ok(());
        };
        backend.signal_term();

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while tokio::time::Instant::now() < deadline {
            if backend.try_wait().is_some() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        warn!(process = %self.def.name, "stop grace expired; killing");
        backend.kill();
        Ok(())
    }

    /// Whether a stop was requested for the current run.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Whether the supervise task is still running (including restart
    /// backoff between child runs).
    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Wait up to `timeout` for the supervise task to settle.
    pub async fn join(&self, timeout: Duration) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(timeout, task).await;
        }
    }

    /// Tear down a supervise task that is parked in restart backoff (no
    /// live child). With a child alive, use `stop` instead.
    pub fn abort(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if self.status().has_pid() {
            return;
        }
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// The supervise loop: spawn, stream, settle, maybe restart.
async fn run_instance(instance: Arc<Instance>, hooks: OutputHooks, policy: RestartPolicy) {
    loop {
        // New run: clear exit code before entering Starting.
        {
            let mut state = instance.state.lock().unwrap_or_else(|e| e.into_inner());
            state.exit_code = None;
        }

        let (backend, mut chunks) = match Backend::spawn(&instance.def).await {
            Ok(pair) => pair,
            Err(err) => {
                (hooks.on_error)(&instance.def.name, &err.to_string());
                let give_up = {
                    let mut state = instance.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.restart_attempts += 1;
                    state.pid = None;
                    !instance.def.auto_restart || state.restart_attempts >= policy.max_failures
                };
                instance.set_status(ProcessStatus::Crashed, &hooks);
                if give_up || instance.stop_requested() {
                    break;
                }
                let failures = instance
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .restart_attempts;
                tokio::time::sleep(policy.delay_for(failures)).await;
                continue;
            }
        };
        let backend = Arc::new(backend);

        // pid, started_at, and Starting commit under one lock.
        {
            let mut state = instance.state.lock().unwrap_or_else(|e| e.into_inner());
            state.pid = backend.pid();
            state.started_at = Some(Utc::now());
            state.status = ProcessStatus::Starting;
        }
        (hooks.on_status)(&instance.def.name, ProcessStatus::Starting);
        *instance.backend.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&backend));

        instance.set_status(ProcessStatus::Running, &hooks);
        info!(process = %instance.def.name, pid = backend.pid(), "process running");

        let run_started = tokio::time::Instant::now();
        let mut assembler = LineAssembler::new();
        while let Some(chunk) = chunks.recv().await {
            (hooks.on_console)(&instance.def.name, &chunk);
            for line in assembler.push(&chunk) {
                (hooks.on_line)(&instance.def.name, &line);
            }
        }
        if let Some(tail) = assembler.flush() {
            (hooks.on_line)(&instance.def.name, &tail);
        }

        let exit_code = backend.wait_exit().await;
        let run_duration = run_started.elapsed();
        debug!(
            process = %instance.def.name,
            exit_code,
            secs = run_duration.as_secs(),
            "process exited"
        );

        *instance.backend.lock().unwrap_or_else(|e| e.into_inner()) = None;
        {
            let mut state = instance.state.lock().unwrap_or_else(|e| e.into_inner());
            state.pid = None;
            state.exit_code = exit_code;
        }

        if instance.stop_requested() {
            instance.set_status(ProcessStatus::Stopped, &hooks);
            break;
        }

        // Unexpected exit.
        let failures = {
            let mut state = instance.state.lock().unwrap_or_else(|e| e.into_inner());
            if run_duration >= policy.reset_after {
                state.restart_attempts = 0;
            }
            state.restart_attempts += 1;
            state.last_restart_at = Some(Utc::now());
            state.restart_attempts
        };
        instance.set_status(ProcessStatus::Crashed, &hooks);

        if !instance.def.auto_restart {
            break;
        }
        if failures >= policy.max_failures {
            (hooks.on_error)(
                &instance.def.name,
                &format!("giving up after {} consecutive failures", failures),
            );
            break;
        }

        tokio::time::sleep(policy.delay_for(failures)).await;
        if instance.stop_requested() {
            break;
        }
    }
}
