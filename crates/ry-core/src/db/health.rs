//! Database health scoring.
//!
//! Combines server-side metrics (connections, cache hit rate) with the
//! analyzer's query statistics into a 0-100 score, a prioritized issue
//! list, and the slowest-query digest.

use super::types::{
    ConnectionPoolHealth, DatabaseHealth, HealthIssue, PerformanceHealth, ServerMetrics,
    SlowQueryInfo,
};
use crate::query::{QueryIssue, QueryStatistic};

/// Cache hit rate below this is flagged.
const CACHE_HIT_FLOOR: f64 = 0.90;

/// Pool utilization above this is flagged.
const UTILIZATION_CEILING: f64 = 0.80;

/// Average statement latency above this is flagged (ms).
const AVG_LATENCY_CEILING: f64 = 100.0;

/// Slowest queries included in the report.
const SLOW_QUERY_DIGEST: usize = 10;

/// Compute the health report.
pub fn compute(metrics: &ServerMetrics, stats: &[QueryStatistic]) -> DatabaseHealth {
    let mut issues = Vec::new();
    let mut score: i32 = 100;

    let utilization = if metrics.max_connections > 0 {
        f64::from(metrics.active_connections) / f64::from(metrics.max_connections)
    } else {
        0.0
    };

    let slow: Vec<&QueryStatistic> = stats
        .iter()
        .filter(|s| s.issue == QueryIssue::Slow || s.avg_ms > AVG_LATENCY_CEILING)
        .collect();
    let total_ms: f64 = stats.iter().map(|s| s.total_ms).sum();
    let total_count: u64 = stats.iter().map(|s| s.count).sum();
    let avg_query_ms = if total_count > 0 {
        total_ms / total_count as f64
    } else {
        0.0
    };

    if metrics.cache_hit_rate > 0.0 && metrics.cache_hit_rate < CACHE_HIT_FLOOR {
        score -= 20;
        issues.push(HealthIssue {
            severity: "high".to_string(),
            message: format!(
                "Cache hit rate at {:.1}%",
                metrics.cache_hit_rate * 100.0
            ),
            suggestion: Some("Increase shared buffer/cache memory".to_string()),
        });
    }

    if utilization > UTILIZATION_CEILING {
        score -= 15;
        issues.push(HealthIssue {
            severity: "high".to_string(),
            message: format!(
                "Connection pool at {:.0}% utilization ({}/{})",
                utilization * 100.0,
                metrics.active_connections,
                metrics.max_connections
            ),
            suggestion: Some("Raise the pool ceiling or find connection leaks".to_string()),
        });
    }

    if !slow.is_empty() {
        score -= (slow.len() as i32 * 5).min(30);
        issues.push(HealthIssue {
            severity: "medium".to_string(),
            message: format!("{} query shapes averaging over {}ms", slow.len(), AVG_LATENCY_CEILING),
            suggestion: Some("Run EXPLAIN on the slow-query digest below".to_string()),
        });
    }

    if avg_query_ms > AVG_LATENCY_CEILING {
        score -= 10;
        issues.push(HealthIssue {
            severity: "medium".to_string(),
            message: format!("Overall average statement latency {:.0}ms", avg_query_ms),
            suggestion: None,
        });
    }

    // SELECT * is a correctness smell as much as a performance one: it
    // breaks index-only scans and widens transfers.
    let select_star = stats
        .iter()
        .filter(|s| s.example_sql.to_uppercase().contains("SELECT *"))
        .count();
    if select_star > 0 {
        score -= 5;
        issues.push(HealthIssue {
            severity: "low".to_string(),
            message: format!("{} query shapes use SELECT *", select_star),
            suggestion: Some("Project only the columns the caller reads".to_string()),
        });
    }

    let n1 = stats.iter().filter(|s| s.issue == QueryIssue::NPlusOne).count();
    if n1 > 0 {
        score -= 10;
        issues.push(HealthIssue {
            severity: "high".to_string(),
            message: format!("{} query shapes flagged as N+1", n1),
            suggestion: Some("Apply the eager-loading recommendations".to_string()),
        });
    }

    let score = score.clamp(0, 100) as u8;
    let status = match score {
        80..=100 => "healthy",
        50..=79 => "degraded",
        _ => "critical",
    };

    let mut slowest: Vec<SlowQueryInfo> = stats
        .iter()
        .map(|s| SlowQueryInfo {
            sql: s.example_sql.clone(),
            avg_ms: s.avg_ms,
            count: s.count,
        })
        .collect();
    slowest.sort_by(|a, b| b.avg_ms.partial_cmp(&a.avg_ms).unwrap_or(std::cmp::Ordering::Equal));
    slowest.truncate(SLOW_QUERY_DIGEST);

    DatabaseHealth {
        score,
        status: status.to_string(),
        connections: ConnectionPoolHealth {
            active: metrics.active_connections,
            max: metrics.max_connections,
            idle: metrics.idle_connections,
            utilization,
        },
        performance: PerformanceHealth {
            cache_hit_rate: metrics.cache_hit_rate,
            tx_per_sec: metrics.tx_per_sec,
            avg_query_ms,
            slow_query_count: slow.len() as u64,
        },
        issues,
        slow_queries: slowest,
        table_stats: metrics.tables.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fingerprint::fingerprint;
    use chrono::Utc;

    fn stat(sql: &str, avg_ms: f64, count: u64, issue: QueryIssue) -> QueryStatistic {
        QueryStatistic {
            fingerprint: fingerprint(sql),
            example_sql: sql.to_string(),
            count,
            total_ms: avg_ms * count as f64,
            avg_ms,
            last_executed_at: Utc::now(),
            issue,
            table: None,
            operation: None,
        }
    }

    fn healthy_metrics() -> ServerMetrics {
        ServerMetrics {
            active_connections: 5,
            max_connections: 100,
            idle_connections: 10,
            cache_hit_rate: 0.99,
            tx_per_sec: 50.0,
            tables: Vec::new(),
        }
    }

    #[test]
    fn test_clean_system_is_healthy() {
        let health = compute(&healthy_metrics(), &[]);
        assert_eq!(health.score, 100);
        assert_eq!(health.status, "healthy");
        assert!(health.issues.is_empty());
    }

    #[test]
    fn test_low_cache_hit_flagged() {
        let mut metrics = healthy_metrics();
        metrics.cache_hit_rate = 0.70;
        let health = compute(&metrics, &[]);
        assert_eq!(health.score, 80);
        assert!(health.issues.iter().any(|i| i.message.contains("Cache hit")));
    }

    #[test]
    fn test_slow_queries_and_select_star_stack_up() {
        let stats = vec![
            stat("SELECT * FROM orders", 800.0, 5, QueryIssue::Slow),
            stat("SELECT id FROM users WHERE id = 1", 1.0, 100, QueryIssue::None),
        ];
        let health = compute(&healthy_metrics(), &stats);
        assert!(health.score < 100);
        assert!(health.issues.iter().any(|i| i.message.contains("SELECT *")));
        assert_eq!(health.performance.slow_query_count, 1);
        assert_eq!(health.slow_queries[0].avg_ms, 800.0);
    }

    #[test]
    fn test_saturated_pool_degrades() {
        let mut metrics = healthy_metrics();
        metrics.active_connections = 95;
        let stats = vec![
            stat("SELECT * FROM a", 500.0, 10, QueryIssue::Slow),
            stat("SELECT * FROM b", 500.0, 10, QueryIssue::Slow),
            stat("SELECT * FROM c", 500.0, 10, QueryIssue::NPlusOne),
        ];
        let health = compute(&metrics, &stats);
        assert!(health.score < 80);
        assert_ne!(health.status, "healthy");
    }
}
