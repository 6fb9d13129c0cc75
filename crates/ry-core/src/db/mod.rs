//! Database gateway: safety-gated execution, EXPLAIN analysis, health.
//!
//! Wraps a [`DatabaseDriver`] with the safety machinery the spec requires:
//! the destructive-statement gate, per-category rate limiting, timeout
//! enforcement, error sanitization, and statistic emission into the query
//! analyzer. Expensive work (EXPLAIN analysis, health computation) is
//! offloaded to the worker pool.

pub mod driver;
pub mod explain;
pub mod guard;
pub mod health;
pub mod types;

pub use driver::{DatabaseDriver, ExplainRows, NullDriver};
pub use types::{
    ColumnInfo, ConnectionConfig, ConnectionStatus, DatabaseHealth, ExplainAnalysis,
    ExplainResult, PlanComparison, QueryResult, ServerMetrics, TableInfo,
};

use crate::query::QueryAnalyzer;
use crate::security::{RateCategory, RateLimiter};
use crate::workers::WorkerPool;
use guard::StatementClass;
use ry_common::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default statement deadline.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// The gateway. One per connected backend.
pub struct DatabaseGateway {
    driver: Arc<dyn DatabaseDriver>,
    analyzer: Arc<QueryAnalyzer>,
    workers: Arc<WorkerPool>,
    limiter: Option<Arc<RateLimiter>>,
    current: Mutex<Option<ConnectionConfig>>,
    query_timeout: Duration,
}

impl DatabaseGateway {
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        analyzer: Arc<QueryAnalyzer>,
        workers: Arc<WorkerPool>,
        limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            driver,
            analyzer,
            workers,
            limiter,
            current: Mutex::new(None),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    fn check_rate(&self) -> Result<()> {
        match self.limiter {
            Some(ref limiter) => limiter.check(RateCategory::Query),
            None => Ok(()),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.driver.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    pub async fn connect(&self, config: ConnectionConfig) -> Result<()> {
        self.driver
            .connect(&config)
            .await
            .map_err(|err| Error::ExecutionFailed(ry_redact::sanitize_error(&err)))?;
        info!(database = %config.database, host = %config.host, "database connected");
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(config);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.driver.disconnect().await?;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!("database disconnected");
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match (current.as_ref(), self.driver.is_connected()) {
            (Some(config), true) => ConnectionStatus::Connected {
                database: config.database.clone(),
                host: config.host.clone(),
            },
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.ensure_connected()?;
        self.driver.list_tables().await.map_err(sanitize)
    }

    pub async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.ensure_connected()?;
        self.driver.list_columns(table).await.map_err(sanitize)
    }

    /// Execute a statement. Destructive statements fail with
    /// `ConfirmationRequired` and have no side effect.
    pub async fn execute(&self, sql: &str, row_limit: usize) -> Result<QueryResult> {
        if let StatementClass::Destructive { reason } = guard::classify(sql) {
            debug!(reason = %reason, "destructive statement gated");
            return Err(Error::ConfirmationRequired { statement: reason });
        }
        self.run(sql, row_limit).await
    }

    /// The only path that runs destructive statements, and only with the
    /// flag actually set.
    pub async fn execute_confirmed(
        &self,
        sql: &str,
        row_limit: usize,
        confirmed: bool,
    ) -> Result<QueryResult> {
        if !confirmed {
            if let StatementClass::Destructive { reason } = guard::classify(sql) {
                return Err(Error::ConfirmationRequired { statement: reason });
            }
        }
        self.run(sql, row_limit).await
    }

    async fn run(&self, sql: &str, row_limit: usize) -> Result<QueryResult> {
        self.check_rate()?;
        self.ensure_connected()?;

        let result = tokio::time::timeout(self.query_timeout, self.driver.execute(sql, row_limit))
            .await
            .map_err(|_| {
                Error::ExecutionFailed(format!(
                    "statement timed out after {:?}",
                    self.query_timeout
                ))
            })?
            .map_err(sanitize)?;

        self.analyzer.record_execution(sql, result.execution_time_ms);
        Ok(result)
    }

    /// Run EXPLAIN and analyze the plan on the worker pool.
    pub async fn explain(&self, sql: &str) -> Result<ExplainResult> {
        self.check_rate()?;
        self.ensure_connected()?;
        let raw = self
            .driver
            .explain(sql)
            .await
            .map_err(|err| Error::ExplainFailed(ry_redact::sanitize_error(&err)))?;
        self.workers
            .submit_and_wait(move || explain::build_result(raw))
            .await
    }

    /// EXPLAIN both statements and compare their scores.
    pub async fn compare_plans(&self, original: &str, optimized: &str) -> Result<PlanComparison> {
        let before = self.explain(original).await?;
        let after = self.explain(optimized).await?;
        let delta = i16::from(after.analysis.performance_score)
            - i16::from(before.analysis.performance_score);
        let verdict = if delta > 0 {
            format!("Optimized plan scores {} points higher", delta)
        } else if delta < 0 {
            format!("Optimized plan scores {} points lower", -delta)
        } else {
            "Both plans score the same".to_string()
        };
        Ok(PlanComparison {
            original: before,
            optimized: after,
            score_delta: delta,
            verdict,
        })
    }

    /// Assemble the health report on the worker pool.
    pub async fn health(&self) -> Result<DatabaseHealth> {
        self.ensure_connected()?;
        let metrics = match self.driver.server_metrics().await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!("server metrics unavailable: {}", ry_redact::sanitize_error(&err));
                ServerMetrics::default()
            }
        };
        let stats = self.analyzer.statistics();
        self.workers
            .submit_and_wait(move || health::compute(&metrics, &stats))
            .await
    }

    pub fn query_statistics(&self) -> Vec<crate::query::QueryStatistic> {
        self.analyzer.statistics()
    }

    pub fn clear_query_statistics(&self) {
        self.analyzer.clear_statistics();
    }
}

fn sanitize(err: Error) -> Error {
    match err {
        Error::NotConnected | Error::ConfirmationRequired { .. } | Error::RateLimited { .. } => err,
        other => Error::ExecutionFailed(ry_redact::sanitize_error(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Driver double that records executed statements.
    #[derive(Default)]
    struct RecordingDriver {
        connected: AtomicBool,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DatabaseDriver for RecordingDriver {
        async fn connect(&self, _config: &ConnectionConfig) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn list_tables(&self) -> Result<Vec<TableInfo>> {
            Ok(vec![TableInfo {
                name: "orders".to_string(),
                schema: None,
                row_estimate: Some(10),
                size_bytes: None,
            }])
        }

        async fn list_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
            Ok(Vec::new())
        }

        async fn execute(&self, sql: &str, _row_limit: usize) -> Result<QueryResult> {
            self.executed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(sql.to_string());
            let mut result = QueryResult::empty();
            result.execution_time_ms = 2.5;
            result.affected_rows = 1;
            Ok(result)
        }

        async fn explain(&self, _sql: &str) -> Result<ExplainRows> {
            Ok(ExplainRows {
                columns: vec!["QUERY PLAN".to_string()],
                rows: vec![vec![serde_json::json!("Seq Scan on orders (rows=1000)")]],
            })
        }

        async fn server_metrics(&self) -> Result<ServerMetrics> {
            Ok(ServerMetrics {
                active_connections: 1,
                max_connections: 10,
                idle_connections: 1,
                cache_hit_rate: 0.99,
                tx_per_sec: 1.0,
                tables: Vec::new(),
            })
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            driver: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "dev".to_string(),
            password: "secret".to_string(),
            database: "app_dev".to_string(),
            ssl_mode: None,
        }
    }

    fn gateway() -> (DatabaseGateway, Arc<RecordingDriver>, Arc<WorkerPool>) {
        let driver = Arc::new(RecordingDriver::default());
        let workers = Arc::new(WorkerPool::with_size(2, 4));
        let gateway = DatabaseGateway::new(
            Arc::clone(&driver) as Arc<dyn DatabaseDriver>,
            Arc::new(QueryAnalyzer::new()),
            Arc::clone(&workers),
            None,
        );
        (gateway, driver, workers)
    }

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let (gateway, _, workers) = gateway();
        assert!(matches!(
            gateway.execute("SELECT 1", 100).await,
            Err(Error::NotConnected)
        ));
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_destructive_gate_blocks_before_driver() {
        let (gateway, driver, workers) = gateway();
        gateway.connect(config()).await.unwrap();

        let err = gateway.execute("DELETE FROM orders", 1000).await;
        assert!(matches!(err, Err(Error::ConfirmationRequired { .. })));
        // No side effect: the driver never saw the statement.
        assert!(driver.executed.lock().unwrap().is_empty());
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_confirmed_path_runs_and_emits_statistic() {
        let (gateway, driver, workers) = gateway();
        gateway.connect(config()).await.unwrap();

        let result = gateway
            .execute_confirmed("DELETE FROM orders WHERE id=1", 1000, true)
            .await
            .unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(driver.executed.lock().unwrap().len(), 1);

        let stats = gateway.query_statistics();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].operation.as_deref(), Some("DELETE"));
        assert_eq!(stats[0].table.as_deref(), Some("orders"));
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_confirmed_false_still_gated() {
        let (gateway, _, workers) = gateway();
        gateway.connect(config()).await.unwrap();
        assert!(matches!(
            gateway.execute_confirmed("DROP TABLE orders", 10, false).await,
            Err(Error::ConfirmationRequired { .. })
        ));
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_explain_analyzes_plan() {
        let (gateway, _, workers) = gateway();
        gateway.connect(config()).await.unwrap();
        let result = gateway.explain("SELECT * FROM orders").await.unwrap();
        assert!(result.analysis.has_table_scan);
        assert!(!result.recommendations.is_empty());
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_compare_plans_same_driver_is_even() {
        let (gateway, _, workers) = gateway();
        gateway.connect(config()).await.unwrap();
        let comparison = gateway
            .compare_plans("SELECT * FROM orders", "SELECT id FROM orders")
            .await
            .unwrap();
        assert_eq!(comparison.score_delta, 0);
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_health_report() {
        let (gateway, _, workers) = gateway();
        gateway.connect(config()).await.unwrap();
        gateway.execute("SELECT 1", 10).await.unwrap();
        let health = gateway.health().await.unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.connections.max, 10);
        workers.close_with_timeout(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let (gateway, _, workers) = gateway();
        assert_eq!(gateway.status(), ConnectionStatus::Disconnected);
        gateway.connect(config()).await.unwrap();
        assert!(matches!(
            gateway.status(),
            ConnectionStatus::Connected { .. }
        ));
        gateway.disconnect().await.unwrap();
        assert_eq!(gateway.status(), ConnectionStatus::Disconnected);
        workers.close_with_timeout(Duration::from_secs(1));
    }
}
