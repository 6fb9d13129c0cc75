//! Query analytics: fingerprinting, per-request grouping, N+1 detection,
//! latency statistics, and recommendations.
//!
//! Two cooperating structures, both keyed by fingerprint and request id:
//! a global statistics map updated on every observed execution, and
//! request-scoped groups closed when the request completes (or after 60 s
//! of inactivity). N+1 detection runs at group-close time; its verdict is
//! folded back into the global map so recommendations can surface it.

pub mod fingerprint;
pub mod n1;
pub mod recommend;
pub mod types;

pub use fingerprint::{extract_operation, extract_table, fingerprint as fingerprint_sql};
pub use types::{
    ImpactEstimate, N1Warning, ObservedQuery, QueryDistribution, QueryIssue, QueryStatistic,
    RequestQueryGroup, Severity, SmartRecommendation,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ry_common::{Fingerprint, RequestId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::{debug, trace};

/// Average latency (ms) above which a shape is classified `Slow`.
pub const SLOW_QUERY_MS: f64 = 100.0;

/// Samples required before the slow classification applies.
pub const SLOW_MIN_SAMPLES: u64 = 3;

/// Inactivity window after which an open request group is force-closed.
pub const GROUP_IDLE_TIMEOUT_SECS: i64 = 60;

/// Closed groups retained for the host surface.
const CLOSED_GROUP_CAP: usize = 200;

struct OpenGroup {
    group: RequestQueryGroup,
    last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct GroupState {
    open: HashMap<RequestId, OpenGroup>,
    closed: VecDeque<RequestQueryGroup>,
}

/// The analytics engine. Shared between the log pipeline (SQL observed in
/// logs) and the database gateway (statements it executed directly).
pub struct QueryAnalyzer {
    stats: RwLock<HashMap<Fingerprint, QueryStatistic>>,
    groups: Mutex<GroupState>,
    ignored: RwLock<HashSet<Fingerprint>>,
    distribution: Mutex<QueryDistribution>,
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            groups: Mutex::new(GroupState::default()),
            ignored: RwLock::new(HashSet::new()),
            distribution: Mutex::new(QueryDistribution::default()),
        }
    }

    /// Record one executed statement into the global statistics map.
    ///
    /// Returns the fingerprint so callers can attach it elsewhere.
    pub fn record_execution(&self, sql: &str, duration_ms: f64) -> Fingerprint {
        let fp = fingerprint::fingerprint(sql);
        let table = fingerprint::extract_table(sql);
        let operation = fingerprint::extract_operation(sql);
        let now = Utc::now();

        self.distribution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(operation.as_deref());

        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        let stat = stats.entry(fp.clone()).or_insert_with(|| QueryStatistic {
            fingerprint: fp.clone(),
            example_sql: sql.to_string(),
            count: 0,
            total_ms: 0.0,
            avg_ms: 0.0,
            last_executed_at: now,
            issue: QueryIssue::None,
            table: table.clone(),
            operation: operation.clone(),
        });
        stat.count += 1;
        stat.total_ms += duration_ms;
        stat.avg_ms = stat.total_ms / stat.count as f64;
        stat.last_executed_at = now;
        if stat.issue == QueryIssue::None
            && stat.count >= SLOW_MIN_SAMPLES
            && stat.avg_ms > SLOW_QUERY_MS
        {
            stat.issue = QueryIssue::Slow;
        }
        fp
    }

    /// Record a statement observed inside a request, appending it to the
    /// request's group in arrival order.
    pub fn observe_request_sql(
        &self,
        request_id: &RequestId,
        sql: &str,
        duration_ms: f64,
    ) -> Fingerprint {
        let fp = self.record_execution(sql, duration_ms);
        let table = fingerprint::extract_table(sql);
        let now = Utc::now();

        let mut state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let open = state
            .open
            .entry(request_id.clone())
            .or_insert_with(|| OpenGroup {
                // SQL arrived before (or without) a Started line; open an
                // implicit group so nothing is lost.
                group: RequestQueryGroup::new(
                    request_id.clone(),
                    String::new(),
                    String::new(),
                    now,
                ),
                last_activity: now,
            });
        open.group.queries.push(ObservedQuery {
            fingerprint: fp.clone(),
            sql: sql.to_string(),
            duration_ms,
            observed_at: now,
            table: table.map(|t| t.to_lowercase()),
        });
        open.last_activity = now;
        fp
    }

    /// Open a request group when its `Started` line is observed.
    pub fn begin_request(&self, request_id: &RequestId, method: &str, endpoint: &str) {
        let now = Utc::now();
        let mut state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let open = state
            .open
            .entry(request_id.clone())
            .or_insert_with(|| OpenGroup {
                group: RequestQueryGroup::new(
                    request_id.clone(),
                    endpoint.to_string(),
                    method.to_string(),
                    now,
                ),
                last_activity: now,
            });
        // An implicit group may already exist; fill in its identity.
        if open.group.endpoint.is_empty() {
            open.group.endpoint = endpoint.to_string();
            open.group.method = method.to_string();
        }
        open.last_activity = now;
    }

    /// Close the group for a completed request and recompute its derived
    /// fields. Returns the closed group when one was open.
    pub fn complete_request(
        &self,
        request_id: &RequestId,
        total_duration_ms: Option<f64>,
    ) -> Option<RequestQueryGroup> {
        let open = {
            let mut state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            state.open.remove(request_id)?
        };
        Some(self.close_group(open.group, total_duration_ms, false))
    }

    /// Force-close groups idle past the timeout. Returns how many closed.
    pub fn expire_idle(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(GROUP_IDLE_TIMEOUT_SECS);
        let expired: Vec<OpenGroup> = {
            let mut state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<RequestId> = state
                .open
                .iter()
                .filter(|(_, open)| open.last_activity < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| state.open.remove(id)).collect()
        };
        let count = expired.len();
        for open in expired {
            self.close_group(open.group, None, true);
        }
        count
    }

    fn close_group(
        &self,
        mut group: RequestQueryGroup,
        total_duration_ms: Option<f64>,
        timed_out: bool,
    ) -> RequestQueryGroup {
        group.timed_out = timed_out;
        group.total_duration_ms =
            total_duration_ms.unwrap_or_else(|| group.queries.iter().map(|q| q.duration_ms).sum());

        // duplicate_count: executions beyond the first of each shape
        let mut seen: HashMap<&Fingerprint, u64> = HashMap::new();
        for query in &group.queries {
            *seen.entry(&query.fingerprint).or_insert(0) += 1;
        }
        group.duplicate_count = seen.values().map(|c| c.saturating_sub(1)).sum();

        let ignored = self.ignored.read().unwrap_or_else(|e| e.into_inner());
        group.n1_warnings = n1::detect(&group, &ignored);
        drop(ignored);

        let slow_count = group
            .queries
            .iter()
            .filter(|q| q.duration_ms > SLOW_QUERY_MS)
            .count() as i64;
        let total = group.queries.len() as i64;
        let n1_count = group.n1_warnings.len() as i64;
        group.health_score =
            (100 - 5 * total - 10 * slow_count - 15 * n1_count).clamp(0, 100) as u8;

        // Fold the verdict back into the global map.
        if !group.n1_warnings.is_empty() {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            for warning in &group.n1_warnings {
                if let Some(stat) = stats.get_mut(&warning.fingerprint) {
                    stat.issue = QueryIssue::NPlusOne;
                }
            }
        }

        debug!(
            request = %group.request_id,
            queries = group.queries.len(),
            n1 = group.n1_warnings.len(),
            health = group.health_score,
            timed_out,
            "request group closed"
        );

        let mut state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        state.closed.push_back(group.clone());
        while state.closed.len() > CLOSED_GROUP_CAP {
            state.closed.pop_front();
        }
        group
    }

    /// All statistics, most recently executed first.
    pub fn statistics(&self) -> Vec<QueryStatistic> {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<QueryStatistic> = stats.values().cloned().collect();
        all.sort_by(|a, b| b.last_executed_at.cmp(&a.last_executed_at));
        all
    }

    pub fn clear_statistics(&self) {
        self.stats
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self
            .distribution
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = QueryDistribution::default();
        trace!("query statistics cleared");
    }

    /// Warnings across recently closed groups, newest group first.
    pub fn n1_warnings(&self) -> Vec<N1Warning> {
        let state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        state
            .closed
            .iter()
            .rev()
            .flat_map(|g| g.n1_warnings.iter().cloned())
            .collect()
    }

    /// Recently closed request groups, newest first.
    pub fn request_groups(&self, limit: usize) -> Vec<RequestQueryGroup> {
        let state = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        state.closed.iter().rev().take(limit).cloned().collect()
    }

    pub fn distribution(&self) -> QueryDistribution {
        self.distribution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Suppress future N+1 warnings for a fingerprint (session-scoped).
    pub fn ignore_pattern(&self, fingerprint: Fingerprint) {
        self.ignored
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fingerprint);
    }

    /// Recommendation digest for the current statistics.
    pub fn recommendations(&self) -> Vec<SmartRecommendation> {
        recommend::build(&self.statistics())
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_sql(id: u64) -> String {
        format!(
            r#"SELECT "users".* FROM "users" WHERE "users"."id" = {}"#,
            id
        )
    }

    #[test]
    fn test_statistic_updated_per_execution() {
        let analyzer = QueryAnalyzer::new();
        analyzer.record_execution("SELECT * FROM users WHERE id = 1", 10.0);
        analyzer.record_execution("SELECT * FROM users WHERE id = 2", 30.0);

        let stats = analyzer.statistics();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 2);
        assert_eq!(stats[0].total_ms, 40.0);
        assert_eq!(stats[0].avg_ms, 20.0);
        assert_eq!(stats[0].issue, QueryIssue::None);
    }

    #[test]
    fn test_slow_classification_needs_three_samples() {
        let analyzer = QueryAnalyzer::new();
        analyzer.record_execution("SELECT * FROM reports", 500.0);
        analyzer.record_execution("SELECT * FROM reports", 500.0);
        assert_eq!(analyzer.statistics()[0].issue, QueryIssue::None);
        analyzer.record_execution("SELECT * FROM reports", 500.0);
        assert_eq!(analyzer.statistics()[0].issue, QueryIssue::Slow);
    }

    #[test]
    fn test_request_group_n1_flow() {
        let analyzer = QueryAnalyzer::new();
        let request = RequestId::new();
        analyzer.begin_request(&request, "GET", "/users");
        for id in 0..7 {
            analyzer.observe_request_sql(&request, &lookup_sql(id), 1.1);
        }
        let group = analyzer.complete_request(&request, Some(23.0)).unwrap();

        assert_eq!(group.n1_warnings.len(), 1);
        let warning = &group.n1_warnings[0];
        assert_eq!(warning.table, "users");
        assert_eq!(warning.count, 7);
        assert!(warning.confidence >= 50);
        assert!(warning.suggestion.contains("eager loading"));
        // 100 - 7*5 - 15 = 50
        assert_eq!(group.health_score, 50);
        assert_eq!(group.total_duration_ms, 23.0);
        assert_eq!(group.duplicate_count, 6);

        // Verdict folded into the global map and recommendations.
        let stats = analyzer.statistics();
        assert_eq!(stats[0].issue, QueryIssue::NPlusOne);
        let recs = analyzer.recommendations();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::High);
    }

    #[test]
    fn test_complete_without_group_is_none() {
        let analyzer = QueryAnalyzer::new();
        assert!(analyzer.complete_request(&RequestId::new(), None).is_none());
    }

    #[test]
    fn test_ignored_pattern_suppresses_warning() {
        let analyzer = QueryAnalyzer::new();
        analyzer.ignore_pattern(fingerprint::fingerprint(&lookup_sql(1)));

        let request = RequestId::new();
        analyzer.begin_request(&request, "GET", "/users");
        for id in 0..7 {
            analyzer.observe_request_sql(&request, &lookup_sql(id), 1.1);
        }
        let group = analyzer.complete_request(&request, None).unwrap();
        assert!(group.n1_warnings.is_empty());
    }

    #[test]
    fn test_sql_order_preserved_in_group() {
        let analyzer = QueryAnalyzer::new();
        let request = RequestId::new();
        analyzer.begin_request(&request, "GET", "/orders");
        for i in 0..10 {
            analyzer.observe_request_sql(
                &request,
                &format!("SELECT * FROM orders WHERE seq = {}", i),
                1.0,
            );
        }
        let group = analyzer.complete_request(&request, None).unwrap();
        let seqs: Vec<String> = group.queries.iter().map(|q| q.sql.clone()).collect();
        for (i, sql) in seqs.iter().enumerate() {
            assert!(sql.ends_with(&format!("= {}", i)));
        }
    }

    #[test]
    fn test_distribution_counts_verbs() {
        let analyzer = QueryAnalyzer::new();
        analyzer.record_execution("SELECT 1", 1.0);
        analyzer.record_execution("INSERT INTO a (x) VALUES (1)", 1.0);
        analyzer.record_execution("DELETE FROM a", 1.0);
        analyzer.record_execution("BEGIN", 1.0);
        let dist = analyzer.distribution();
        assert_eq!(dist.select, 1);
        assert_eq!(dist.insert, 1);
        assert_eq!(dist.delete, 1);
        assert_eq!(dist.other, 1);
        assert_eq!(dist.total(), 4);
    }
}
