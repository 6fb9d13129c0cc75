//! Database gateway data model.

use serde::{Deserialize, Serialize};

/// Connection parameters. The password is held only in memory; persisted
/// saved connections never include it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

/// Gateway connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected {
        database: String,
        host: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub is_primary_key: bool,
}

/// Result of one executed statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub affected_rows: u64,
    pub execution_time_ms: f64,
    pub is_select: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            column_types: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            affected_rows: 0,
            execution_time_ms: 0.0,
            is_select: false,
            error: None,
        }
    }
}

/// EXPLAIN plan structure analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainAnalysis {
    pub has_table_scan: bool,
    pub has_index_scan: bool,
    pub rows_examined: u64,
    pub using_temporary: bool,
    pub using_filesort: bool,
    pub summary: String,
    /// 0-100, higher is better.
    pub performance_score: u8,
}

/// EXPLAIN output plus derived analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub recommendations: Vec<String>,
    pub analysis: ExplainAnalysis,
}

/// Side-by-side comparison of two plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanComparison {
    pub original: ExplainResult,
    pub optimized: ExplainResult,
    /// Positive when the optimized plan scores higher.
    pub score_delta: i16,
    pub verdict: String,
}

/// One issue in the health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionPoolHealth {
    pub active: u32,
    pub max: u32,
    pub idle: u32,
    /// active / max, 0.0-1.0.
    pub utilization: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceHealth {
    pub cache_hit_rate: f64,
    pub tx_per_sec: f64,
    pub avg_query_ms: f64,
    pub slow_query_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQueryInfo {
    pub sql: String,
    pub avg_ms: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatInfo {
    pub name: String,
    pub row_estimate: u64,
    pub size_bytes: u64,
}

/// The assembled health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    /// 0-100, higher is better.
    pub score: u8,
    /// `healthy`, `degraded`, or `critical`.
    pub status: String,
    pub connections: ConnectionPoolHealth,
    pub performance: PerformanceHealth,
    pub issues: Vec<HealthIssue>,
    pub slow_queries: Vec<SlowQueryInfo>,
    pub table_stats: Vec<TableStatInfo>,
}

/// Raw server-side metrics a driver can sample, used to compute health.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub active_connections: u32,
    pub max_connections: u32,
    pub idle_connections: u32,
    pub cache_hit_rate: f64,
    pub tx_per_sec: f64,
    pub tables: Vec<TableStatInfo>,
}
