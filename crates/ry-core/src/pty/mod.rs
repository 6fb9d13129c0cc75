//! Pseudo-terminal allocation and child attachment.
//!
//! Wraps `portable-pty`: allocates a master/slave pair, spawns the child on
//! the slave end with the definition's environment and working directory,
//! and pumps raw output chunks from a blocking reader thread into an async
//! channel. Line assembly happens upstream in the supervisor; this layer
//! deals only in bytes.
//!
//! Writes and reads are concurrent-safe per handle. `close()` follows the
//! polite-then-firm protocol: SIGTERM, a 2 s grace period, then SIGKILL.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use ry_common::{Error, ProcessDefinition, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Output chunk capacity before the reader thread blocks.
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Read buffer size for the PTY master.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Grace period between SIGTERM and SIGKILL on close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A child process attached to a pseudo-terminal.
pub struct PtyHandle {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn std::io::Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    chunks: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    pid: Option<u32>,
    closed: AtomicBool,
}

impl PtyHandle {
    /// Allocate a PTY and spawn `def`'s command attached to its slave end.
    pub fn spawn(def: &ProcessDefinition) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| Error::PtyAllocFailed(err.to_string()))?;

        let mut cmd = CommandBuilder::new(&def.command);
        cmd.args(&def.args);
        if let Some(ref dir) = def.working_dir {
            cmd.cwd(dir);
        }
        for (key, value) in &def.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| Error::SpawnFailed {
                name: def.name.clone(),
                cause: err.to_string(),
            })?;
        // The slave end belongs to the child now.
        drop(pair.slave);

        let pid = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| Error::PtyAllocFailed(err.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| Error::PtyAllocFailed(err.to_string()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_CAPACITY);
        let name = def.name.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // EIO is the normal end-of-stream on Linux PTYs.
                        trace!(process = %name, "pty read ended: {}", err);
                        break;
                    }
                }
            }
        });

        debug!(process = %def.name, pid, "pty child spawned");
        Ok(Self {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            chunks: Mutex::new(Some(chunk_rx)),
            pid,
            closed: AtomicBool::new(false),
        })
    }

    /// OS process id of the attached child.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the output chunk stream. Yields raw bytes until EOF/close;
    /// can only be taken once.
    pub fn take_chunks(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Write bytes to the child's terminal.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Resize the terminal.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }
        self.master
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| Error::PtyAllocFailed(err.to_string()))
    }

    /// Poll the child for exit without blocking.
    pub fn try_wait(&self) -> Option<i32> {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    /// Await the child's exit code.
    pub async fn wait_exit(&self) -> Option<i32> {
        loop {
            if let Some(code) = self.try_wait() {
                return Some(code);
            }
            if self.closed.load(Ordering::SeqCst) {
                // close() already reaped or killed it
                return self.try_wait();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Terminate the child: SIGTERM, wait up to the grace period, SIGKILL.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }

        self.signal_term();

        let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
        while tokio::time::Instant::now() < deadline {
            if self.try_wait().is_some() {
                debug!(pid = self.pid, "pty child exited within grace period");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        warn!(pid = self.pid, "pty child survived SIGTERM; killing");
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = child.kill() {
            trace!("kill after grace failed (already gone?): {}", err);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn signal_term(&self) {
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_term(&self) {
        // No SIGTERM equivalent; the grace period degenerates to kill().
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_def() -> ProcessDefinition {
        ProcessDefinition::new("echo-test", "echo").with_args(&["hello-pty"])
    }

    #[tokio::test]
    async fn test_spawn_captures_output() {
        let handle = PtyHandle::spawn(&echo_def()).unwrap();
        let mut rx = handle.take_chunks().unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("hello-pty"));
    }

    #[tokio::test]
    async fn test_pid_present_and_exit_observed() {
        let handle = PtyHandle::spawn(&echo_def()).unwrap();
        assert!(handle.pid().is_some());
        let code = handle.wait_exit().await;
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces() {
        let def = ProcessDefinition::new("missing", "definitely-not-a-command-xyz");
        match PtyHandle::spawn(&def) {
            Err(Error::SpawnFailed { name, .. }) => assert_eq!(name, "missing"),
            // Some platforms only fail at first read; accept a handle whose
            // child exits nonzero immediately.
            Ok(handle) => {
                let code = handle.wait_exit().await;
                assert_ne!(code, Some(0));
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_double_close_reports_already_closed() {
        let handle = PtyHandle::spawn(&ProcessDefinition::new("cat", "cat")).unwrap();
        handle.close().await.unwrap();
        assert!(matches!(handle.close().await, Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_chunks_taken_once() {
        let handle = PtyHandle::spawn(&echo_def()).unwrap();
        assert!(handle.take_chunks().is_some());
        assert!(handle.take_chunks().is_none());
    }
}
