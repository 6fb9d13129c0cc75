//! Recommendation digest derived from query statistics.
//!
//! Impact numbers are declared heuristics carried from field experience,
//! not measurements; they stay constant until replaced by empirical
//! calibration.

use super::types::{ImpactEstimate, QueryIssue, QueryStatistic, Severity, SmartRecommendation};

/// Average latency above which a shape earns a slow-query recommendation.
pub const SLOW_RECOMMENDATION_MS: f64 = 500.0;

/// Average latency above which a slow-query recommendation becomes
/// high severity.
const SLOW_SEVERE_MS: f64 = 1000.0;

/// Declared impact heuristics for eager-loading fixes.
const EAGER_LOAD_TIME_REDUCTION_PCT: u8 = 70;
const EAGER_LOAD_COUNT_REDUCTION_PCT: u8 = 80;
const EAGER_LOAD_CONFIDENCE: u8 = 85;

/// Declared impact heuristics for slow-query fixes.
const SLOW_QUERY_TIME_REDUCTION_PCT: u8 = 50;
const SLOW_QUERY_CONFIDENCE: u8 = 60;

/// Build the recommendation digest for the current statistics.
pub fn build(stats: &[QueryStatistic]) -> Vec<SmartRecommendation> {
    let mut recommendations = Vec::new();

    for stat in stats {
        if stat.issue == QueryIssue::NPlusOne && stat.count > 1 {
            let table = stat.table.as_deref().unwrap_or("records");
            recommendations.push(SmartRecommendation {
                fingerprint: stat.fingerprint.clone(),
                severity: Severity::High,
                title: format!("N+1 query pattern on {}", table),
                description: format!(
                    "This lookup ran {} times ({}ms total). Each request issues one query \
                     per parent row instead of batching.",
                    stat.count,
                    stat.total_ms.round()
                ),
                fix_template: format!(
                    "# Eager-load the association:\n{}.includes(:{})",
                    pluralized_parent(table),
                    singularize(table)
                ),
                impact: ImpactEstimate {
                    query_time_reduction: EAGER_LOAD_TIME_REDUCTION_PCT,
                    query_count_reduction: EAGER_LOAD_COUNT_REDUCTION_PCT,
                    total_time_saved_ms: stat.total_ms * f64::from(EAGER_LOAD_TIME_REDUCTION_PCT)
                        / 100.0,
                    confidence_score: EAGER_LOAD_CONFIDENCE,
                },
            });
        } else if stat.avg_ms > SLOW_RECOMMENDATION_MS {
            let severity = if stat.avg_ms > SLOW_SEVERE_MS {
                Severity::High
            } else {
                Severity::Medium
            };
            recommendations.push(SmartRecommendation {
                fingerprint: stat.fingerprint.clone(),
                severity,
                title: format!(
                    "Slow query averaging {}ms",
                    stat.avg_ms.round()
                ),
                description: format!(
                    "Observed {} times, {}ms average. Run EXPLAIN to check for \
                     sequential scans or missing indexes.",
                    stat.count,
                    stat.avg_ms.round()
                ),
                fix_template: format!("EXPLAIN {}", stat.example_sql),
                impact: ImpactEstimate {
                    query_time_reduction: SLOW_QUERY_TIME_REDUCTION_PCT,
                    query_count_reduction: 0,
                    total_time_saved_ms: stat.total_ms * f64::from(SLOW_QUERY_TIME_REDUCTION_PCT)
                        / 100.0,
                    confidence_score: SLOW_QUERY_CONFIDENCE,
                },
            });
        }
    }

    recommendations.sort_by(|a, b| b.severity.cmp(&a.severity));
    recommendations
}

/// Best-effort Rails-ish association name from a table name.
fn singularize(table: &str) -> String {
    let lower = table.to_lowercase();
    if let Some(stem) = lower.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = lower.strip_suffix('s') {
        stem.to_string()
    } else {
        lower
    }
}

fn pluralized_parent(table: &str) -> String {
    // The parent collection is unknowable from the child table alone; the
    // template names the child collection as a placeholder scope.
    format!("{}_scope", table.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fingerprint::fingerprint;
    use chrono::Utc;

    fn stat(avg_ms: f64, count: u64, issue: QueryIssue) -> QueryStatistic {
        QueryStatistic {
            fingerprint: fingerprint("SELECT * FROM users WHERE id = 1"),
            example_sql: "SELECT * FROM users WHERE id = 1".to_string(),
            count,
            total_ms: avg_ms * count as f64,
            avg_ms,
            last_executed_at: Utc::now(),
            issue,
            table: Some("users".to_string()),
            operation: Some("SELECT".to_string()),
        }
    }

    #[test]
    fn test_n_plus_one_yields_high_severity_eager_loading() {
        let recs = build(&[stat(1.0, 7, QueryIssue::NPlusOne)]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::High);
        assert!(recs[0].fix_template.contains("includes(:user)"));
        assert_eq!(recs[0].impact.query_time_reduction, 70);
    }

    #[test]
    fn test_slow_query_yields_explain_reference() {
        let recs = build(&[stat(600.0, 4, QueryIssue::Slow)]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::Medium);
        assert!(recs[0].fix_template.starts_with("EXPLAIN"));
    }

    #[test]
    fn test_very_slow_query_is_high_severity() {
        let recs = build(&[stat(1500.0, 2, QueryIssue::Slow)]);
        assert_eq!(recs[0].severity, Severity::High);
    }

    #[test]
    fn test_healthy_stats_yield_nothing() {
        let recs = build(&[stat(20.0, 100, QueryIssue::None)]);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("data"), "data");
    }
}
