//! Log pipeline: bounded ring, attribution, classification, routing.
//!
//! One serialized writer appends to the ring; readers get snapshots;
//! subscribers get real-time copies over bounded channels that drop on
//! back-pressure (a slow UI can never stall ingestion — the dropped
//! counter records the loss). After the ring append, the line goes to the
//! active framework plugin; whatever structured entry comes back is routed
//! to the exception tracker, the query analyzer, or the metrics tracker.

use crate::exceptions::ExceptionTracker;
use crate::metrics::MetricsTracker;
use crate::plugin::PluginRegistry;
use crate::query::QueryAnalyzer;
use chrono::Utc;
use ry_common::{LogLevel, LogLine, ParsedEntry, ParsedPayload};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

/// Default ring capacity in lines.
pub const DEFAULT_RING_CAPACITY: usize = 10_000;

/// Default per-subscriber queue depth.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 1_024;

/// Snapshot filter.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub process: Option<String>,
    pub level: Option<LogLevel>,
    pub limit: Option<usize>,
}

impl LogFilter {
    fn matches(&self, line: &LogLine) -> bool {
        if let Some(ref process) = self.process {
            if &line.process != process {
                return false;
            }
        }
        if let Some(level) = self.level {
            if line.level < level {
                return false;
            }
        }
        true
    }
}

struct Ring {
    lines: VecDeque<LogLine>,
    next_id: u64,
    capacity: usize,
}

/// The pipeline. Construct via [`LogPipeline::new`] with the trackers it
/// routes into.
pub struct LogPipeline {
    ring: Mutex<Ring>,
    subscribers: Mutex<Vec<mpsc::Sender<LogLine>>>,
    dropped: AtomicU64,
    plugins: Arc<PluginRegistry>,
    analyzer: Arc<QueryAnalyzer>,
    exceptions: Arc<ExceptionTracker>,
    metrics: Arc<MetricsTracker>,
}

impl LogPipeline {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        analyzer: Arc<QueryAnalyzer>,
        exceptions: Arc<ExceptionTracker>,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY, plugins, analyzer, exceptions, metrics)
    }

    pub fn with_capacity(
        capacity: usize,
        plugins: Arc<PluginRegistry>,
        analyzer: Arc<QueryAnalyzer>,
        exceptions: Arc<ExceptionTracker>,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self {
            ring: Mutex::new(Ring {
                lines: VecDeque::with_capacity(capacity.min(DEFAULT_RING_CAPACITY)),
                next_id: 0,
                capacity: capacity.max(1),
            }),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            plugins,
            analyzer,
            exceptions,
            metrics,
        }
    }

    /// Ingest one complete line of output from `process`.
    ///
    /// Returns the stored line together with whatever structured entries
    /// the active plugin extracted.
    pub fn ingest(&self, process: &str, content: &str) -> (LogLine, Vec<ParsedEntry>) {
        let line = {
            let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
            let line = LogLine {
                id: ring.next_id,
                process: process.to_string(),
                content: content.to_string(),
                level: LogLevel::classify(content),
                timestamp: Utc::now(),
            };
            ring.next_id += 1;
            if ring.lines.len() >= ring.capacity {
                ring.lines.pop_front();
            }
            ring.lines.push_back(line.clone());
            line
        };

        self.fan_out(&line);

        let parsed = self
            .plugins
            .active()
            .map(|plugin| plugin.parse_line(&line))
            .unwrap_or_default();
        for entry in &parsed {
            self.route(entry);
        }

        (line, parsed)
    }

    fn fan_out(&self, line: &LogLine) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn route(&self, entry: &ParsedEntry) {
        match &entry.payload {
            ParsedPayload::Exception(event) => {
                self.exceptions.record(&entry.process, event);
            }
            ParsedPayload::Sql(event) => {
                match &entry.request_id {
                    Some(request_id) => {
                        self.analyzer.observe_request_sql(
                            request_id,
                            &event.query,
                            event.duration_ms,
                        );
                    }
                    None => {
                        self.analyzer.record_execution(&event.query, event.duration_ms);
                    }
                };
            }
            ParsedPayload::Request(event) => {
                let endpoint = format!("{} {}", event.method, event.path);
                match (event.status, &entry.request_id) {
                    // Completion line: close the group, feed the digest.
                    (Some(status), Some(request_id)) => {
                        self.analyzer.complete_request(request_id, event.duration_ms);
                        self.metrics.record_request(
                            &endpoint,
                            event.duration_ms.unwrap_or(0.0),
                            Some(status),
                        );
                    }
                    (Some(status), None) => {
                        self.metrics.record_request(
                            &endpoint,
                            event.duration_ms.unwrap_or(0.0),
                            Some(status),
                        );
                    }
                    // Start line: open the group.
                    (None, Some(request_id)) => {
                        self.analyzer.begin_request(request_id, &event.method, &event.path);
                    }
                    (None, None) => {}
                }
            }
        }
        trace!(line = entry.source_line_id, "entry routed");
    }

    /// Filtered snapshot: the newest matching lines, oldest first.
    pub fn snapshot(&self, filter: &LogFilter) -> Vec<LogLine> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut selected: Vec<LogLine> = ring
            .lines
            .iter()
            .rev()
            .filter(|line| filter.matches(line))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    pub fn clear(&self) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.lines.clear();
    }

    /// Subscribe to real-time lines. The queue is bounded; on overflow the
    /// oldest unread lines are lost to this subscriber and the dropped
    /// counter rises.
    pub fn subscribe(&self) -> mpsc::Receiver<LogLine> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Lines lost to slow subscribers since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Plain-text export of a filtered snapshot.
    pub fn export_plain(&self, filter: &LogFilter) -> String {
        self.snapshot(filter)
            .iter()
            .map(|line| {
                format!(
                    "{} [{}] {}: {}",
                    line.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                    line.level,
                    line.process,
                    line.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_pipeline(capacity: usize) -> LogPipeline {
        LogPipeline::with_capacity(
            capacity,
            Arc::new(PluginRegistry::new()),
            Arc::new(QueryAnalyzer::new()),
            Arc::new(ExceptionTracker::new()),
            Arc::new(MetricsTracker::new()),
        )
    }

    #[test]
    fn test_ring_eviction_keeps_newest() {
        let pipeline = bare_pipeline(3);
        for label in ["A", "B", "C", "D", "E"] {
            pipeline.ingest("web", label);
        }
        let lines = pipeline.snapshot(&LogFilter {
            limit: Some(10),
            ..Default::default()
        });
        let contents: Vec<&str> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["C", "D", "E"]);
    }

    #[test]
    fn test_ids_monotonic_across_eviction() {
        let pipeline = bare_pipeline(2);
        for i in 0..5 {
            pipeline.ingest("web", &format!("line {}", i));
        }
        let lines = pipeline.snapshot(&LogFilter::default());
        assert_eq!(lines[0].id, 3);
        assert_eq!(lines[1].id, 4);
    }

    #[test]
    fn test_level_filter_is_at_least() {
        let pipeline = bare_pipeline(10);
        pipeline.ingest("web", "plain line");
        pipeline.ingest("web", "WARN something");
        pipeline.ingest("web", "ERROR boom");
        let lines = pipeline.snapshot(&LogFilter {
            level: Some(LogLevel::Warn),
            ..Default::default()
        });
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_process_filter() {
        let pipeline = bare_pipeline(10);
        pipeline.ingest("web", "from web");
        pipeline.ingest("worker", "from worker");
        let lines = pipeline.snapshot(&LogFilter {
            process: Some("worker".to_string()),
            ..Default::default()
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].content, "from worker");
    }

    #[tokio::test]
    async fn test_subscriber_receives_lines_in_order() {
        let pipeline = bare_pipeline(100);
        let mut rx = pipeline.subscribe();
        for i in 0..50 {
            pipeline.ingest("web", &format!("line {}", i));
        }
        for i in 0..50 {
            let line = rx.recv().await.unwrap();
            assert_eq!(line.content, format!("line {}", i));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_and_counts() {
        let pipeline = bare_pipeline(100);
        // Queue depth is fixed; overflow it without reading.
        let _rx = pipeline.subscribe();
        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 10) {
            pipeline.ingest("web", &format!("line {}", i));
        }
        assert_eq!(pipeline.dropped(), 10);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let pipeline = bare_pipeline(10);
        let rx = pipeline.subscribe();
        drop(rx);
        pipeline.ingest("web", "after close");
        assert_eq!(pipeline.dropped(), 0);
        assert_eq!(
            pipeline
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            0
        );
    }

    #[test]
    fn test_clear_empties_ring() {
        let pipeline = bare_pipeline(10);
        pipeline.ingest("web", "x");
        pipeline.clear();
        assert!(pipeline.snapshot(&LogFilter::default()).is_empty());
    }

    #[test]
    fn test_export_plain_format() {
        let pipeline = bare_pipeline(10);
        pipeline.ingest("web", "ERROR kaboom");
        let text = pipeline.export_plain(&LogFilter::default());
        assert!(text.contains("[error] web: ERROR kaboom"));
    }
}
