//! Rolling system and request metrics.
//!
//! A 24-point time series sampled once per minute, plus a top-K endpoint
//! digest updated on every observed request. Everything is in-memory and
//! bounded; `reset()` starts over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Points kept in the rolling series (one per minute, 24 total).
pub const SERIES_CAPACITY: usize = 24;

/// Endpoints kept in the digest.
pub const TOP_ENDPOINTS: usize = 20;

/// Latency samples retained per endpoint for the p95 estimate.
const ENDPOINT_SAMPLE_CAP: usize = 256;

/// One sample of the rolling series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub at: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    pub requests: u64,
    pub response_time_ms: f64,
    pub errors: u64,
}

/// Aggregates for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStat {
    pub endpoint: String,
    pub requests: u64,
    pub avg_time_ms: f64,
    pub p95_time_ms: f64,
    pub errors: u64,
}

/// Snapshot handed to the host surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub series: Vec<MetricPoint>,
    pub endpoints: Vec<EndpointStat>,
}

#[derive(Default)]
struct EndpointAccumulator {
    requests: u64,
    errors: u64,
    total_ms: f64,
    samples: VecDeque<f64>,
}

impl EndpointAccumulator {
    fn record(&mut self, duration_ms: f64, is_error: bool) {
        self.requests += 1;
        self.total_ms += duration_ms;
        if is_error {
            self.errors += 1;
        }
        if self.samples.len() >= ENDPOINT_SAMPLE_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ms);
    }

    fn p95(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}

#[derive(Default)]
struct Window {
    requests: u64,
    errors: u64,
    total_ms: f64,
}

struct Inner {
    series: VecDeque<MetricPoint>,
    endpoints: HashMap<String, EndpointAccumulator>,
    window: Window,
}

/// Metrics tracker shared across the pipeline.
pub struct MetricsTracker {
    inner: Mutex<Inner>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                series: VecDeque::with_capacity(SERIES_CAPACITY),
                endpoints: HashMap::new(),
                window: Window::default(),
            }),
        }
    }

    /// Record one completed request.
    pub fn record_request(&self, endpoint: &str, duration_ms: f64, status: Option<u16>) {
        let is_error = status.map(|s| s >= 500).unwrap_or(false);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.window.requests += 1;
        inner.window.total_ms += duration_ms;
        if is_error {
            inner.window.errors += 1;
        }
        inner
            .endpoints
            .entry(endpoint.to_string())
            .or_default()
            .record(duration_ms, is_error);
    }

    /// Roll the current window into the series with a host resource sample.
    /// Called once per minute by the workbench ticker.
    pub fn sample(&self, cpu: f64, memory: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let window = std::mem::take(&mut inner.window);
        let response_time_ms = if window.requests > 0 {
            window.total_ms / window.requests as f64
        } else {
            0.0
        };
        if inner.series.len() >= SERIES_CAPACITY {
            inner.series.pop_front();
        }
        inner.series.push_back(MetricPoint {
            at: Utc::now(),
            cpu,
            memory,
            requests: window.requests,
            response_time_ms,
            errors: window.errors,
        });
    }

    /// Series plus top-K endpoint digest (by request count).
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut endpoints: Vec<EndpointStat> = inner
            .endpoints
            .iter()
            .map(|(endpoint, acc)| EndpointStat {
                endpoint: endpoint.clone(),
                requests: acc.requests,
                avg_time_ms: if acc.requests > 0 {
                    acc.total_ms / acc.requests as f64
                } else {
                    0.0
                },
                p95_time_ms: acc.p95(),
                errors: acc.errors,
            })
            .collect();
        endpoints.sort_by(|a, b| b.requests.cmp(&a.requests));
        endpoints.truncate(TOP_ENDPOINTS);

        MetricsSnapshot {
            series: inner.series.iter().cloned().collect(),
            endpoints,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.series.clear();
        inner.endpoints.clear();
        inner.window = Window::default();
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
