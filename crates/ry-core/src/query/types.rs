//! Query analytics data model.

use chrono::{DateTime, Utc};
use ry_common::{Fingerprint, RequestId};
use serde::{Deserialize, Serialize};

/// Problem classification attached to a fingerprint's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIssue {
    None,
    Slow,
    NPlusOne,
}

/// Rolling statistics for one query shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStatistic {
    pub fingerprint: Fingerprint,
    /// A representative raw statement for display.
    pub example_sql: String,
    pub count: u64,
    pub total_ms: f64,
    pub avg_ms: f64,
    pub last_executed_at: DateTime<Utc>,
    pub issue: QueryIssue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// One SQL execution inside a request group, arrival order preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedQuery {
    pub fingerprint: Fingerprint,
    pub sql: String,
    pub duration_ms: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// An N+1 access pattern detected inside one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N1Warning {
    pub fingerprint: Fingerprint,
    pub table: String,
    pub count: u64,
    pub total_duration_ms: f64,
    /// 0-100; grows with repetition count.
    pub confidence: u8,
    pub suggestion: String,
    /// Up to three example statements.
    pub examples: Vec<String>,
}

/// The SQL observed between a request's start and completion lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestQueryGroup {
    pub request_id: RequestId,
    pub endpoint: String,
    pub method: String,
    pub started_at: DateTime<Utc>,
    pub queries: Vec<ObservedQuery>,
    pub total_duration_ms: f64,
    pub duplicate_count: u64,
    pub n1_warnings: Vec<N1Warning>,
    /// 0-100, higher is better.
    pub health_score: u8,
    /// Set when the group was closed by inactivity instead of a
    /// completion line.
    pub timed_out: bool,
}

impl RequestQueryGroup {
    pub fn new(request_id: RequestId, endpoint: String, method: String, at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            endpoint,
            method,
            started_at: at,
            queries: Vec::new(),
            total_duration_ms: 0.0,
            duplicate_count: 0,
            n1_warnings: Vec::new(),
            health_score: 100,
            timed_out: false,
        }
    }
}

/// Severity of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Estimated impact of applying a recommendation. These are declared
/// heuristics, not measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactEstimate {
    /// Expected query-time reduction, percent.
    pub query_time_reduction: u8,
    /// Expected reduction in query count, percent.
    pub query_count_reduction: u8,
    /// Expected total time saved per request, milliseconds.
    pub total_time_saved_ms: f64,
    /// How much to trust this estimate, 0-100.
    pub confidence_score: u8,
}

/// An actionable recommendation derived from statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartRecommendation {
    pub fingerprint: Fingerprint,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Code or SQL template for the suggested fix.
    pub fix_template: String,
    pub impact: ImpactEstimate,
}

/// Breakdown of observed statements by verb.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDistribution {
    pub select: u64,
    pub insert: u64,
    pub update: u64,
    pub delete: u64,
    pub other: u64,
}

impl QueryDistribution {
    pub fn record(&mut self, operation: Option<&str>) {
        match operation {
            Some("SELECT") => self.select += 1,
            Some("INSERT") => self.insert += 1,
            Some("UPDATE") => self.update += 1,
            Some("DELETE") => self.delete += 1,
            _ => self.other += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.select + self.insert + self.update + self.delete + self.other
    }
}
