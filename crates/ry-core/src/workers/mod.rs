//! Bounded worker pool for expensive synchronous jobs.
//!
//! EXPLAIN analysis, health computation, and large result-set handling run
//! here instead of on the async runtime. The pool owns a fixed set of OS
//! threads consuming a bounded queue; `submit` hands back a handle whose
//! result arrives over a oneshot channel, so async callers can await it
//! with their own deadline.

use ry_common::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters exposed at the host boundary.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStats {
    pub size: usize,
    pub queue_capacity: usize,
    pub submitted: u64,
    pub completed: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
}

/// Handle to a submitted job.
pub struct JobHandle<T> {
    rx: tokio::sync::oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Await the job's result. Fails with `WorkerPoolClosed` when the pool
    /// shut down before the job ran.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| Error::WorkerPoolClosed)
    }
}

/// Fixed-size pool of job threads with a bounded queue.
pub struct WorkerPool {
    tx: Mutex<Option<SyncSender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    size: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Pool sized to the machine's CPU count, queue twice that.
    pub fn new() -> Self {
        let size = num_cpus::get().max(1);
        Self::with_size(size, size * 2)
    }

    pub fn with_size(size: usize, queue_capacity: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = std::sync::mpsc::sync_channel::<Job>(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(size);
        for worker in 0..size {
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                worker_loop(worker, rx, counters)
            }));
        }
        debug!(size, queue_capacity, "worker pool started");

        Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            counters,
            size,
            queue_capacity,
        }
    }

    /// Queue a job. Blocks briefly when the queue is full; fails with
    /// `WorkerPoolClosed` after shutdown.
    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let wrapped: Job = Box::new(move || {
            let _ = result_tx.send(job());
        });

        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(Error::WorkerPoolClosed)?;
        tx.send(wrapped).map_err(|_| Error::WorkerPoolClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(JobHandle { rx: result_rx })
    }

    /// Queue a job and await its result.
    pub async fn submit_and_wait<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(job)?.wait().await
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let submitted = self.counters.submitted.load(Ordering::Relaxed);
        let completed = self.counters.completed.load(Ordering::Relaxed);
        WorkerPoolStats {
            size: self.size,
            queue_capacity: self.queue_capacity,
            submitted,
            completed,
            in_flight: submitted.saturating_sub(completed),
        }
    }

    /// Stop accepting jobs, drain the queue, and wait up to `timeout` for
    /// the workers to finish. Returns whether every queued job completed.
    pub fn close_with_timeout(&self, timeout: Duration) -> bool {
        {
            let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take();
        }

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        if handles.is_empty() {
            return true;
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for handle in handles {
                let _ = handle.join();
            }
            let _ = done_tx.send(());
        });

        let drained = done_rx.recv_timeout(timeout).is_ok();
        debug!(drained, "worker pool closed");
        drained
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(worker: usize, rx: Arc<Mutex<Receiver<Job>>>, counters: Arc<Counters>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(|e| e.into_inner());
            guard.recv()
        };
        match job {
            Ok(job) => {
                trace!(worker, "job started");
                job();
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            // Channel closed: pool is shutting down.
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_and_wait_returns_result() {
        let pool = WorkerPool::with_size(2, 4);
        let result = pool.submit_and_wait(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
        pool.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_jobs_run_concurrently_across_workers() {
        let pool = WorkerPool::with_size(4, 8);
        let mut handles = Vec::new();
        for i in 0..8u64 {
            handles.push(pool.submit(move || i * 10).unwrap());
        }
        let mut total = 0;
        for handle in handles {
            total += handle.wait().await.unwrap();
        }
        assert_eq!(total, 280);
        pool.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let pool = WorkerPool::with_size(1, 2);
        assert!(pool.close_with_timeout(Duration::from_secs(1)));
        assert!(matches!(
            pool.submit(|| ()),
            Err(Error::WorkerPoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_drains_queued_jobs() {
        let pool = WorkerPool::with_size(1, 8);
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(
                pool.submit(|| std::thread::sleep(Duration::from_millis(10)))
                    .unwrap(),
            );
        }
        assert!(pool.close_with_timeout(Duration::from_secs(5)));
        let stats = pool.stats();
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.completed, 4);
    }
}
