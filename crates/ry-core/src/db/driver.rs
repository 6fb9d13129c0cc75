//! The driver abstraction the gateway consumes.
//!
//! Concrete drivers (postgres, mysql, sqlite) live outside the core; the
//! gateway only needs this narrow surface. `NullDriver` is the built-in
//! stand-in: it accepts connections and returns empty results, which keeps
//! the rest of the stack exercisable without a database on the machine.

use super::types::{
    ColumnInfo, ConnectionConfig, QueryResult, ServerMetrics, TableInfo,
};
use async_trait::async_trait;
use ry_common::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Raw EXPLAIN output before analysis.
#[derive(Debug, Clone, Default)]
pub struct ExplainRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// A relational backend as the core sees it.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Execute without any safety interpretation; the gateway has already
    /// gated the statement.
    async fn execute(&self, sql: &str, row_limit: usize) -> Result<QueryResult>;

    /// Run the backend's EXPLAIN for the statement.
    async fn explain(&self, sql: &str) -> Result<ExplainRows>;

    /// Sample server-side metrics for the health report.
    async fn server_metrics(&self) -> Result<ServerMetrics>;
}

/// Driver stand-in that accepts everything and returns nothing.
#[derive(Default)]
pub struct NullDriver {
    connected: AtomicBool,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[async_trait]
impl DatabaseDriver for NullDriver {
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
        self.ensure_connected()?;
        Ok(Vec::new())
    }

    async fn list_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        self.ensure_connected()?;
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, _row_limit: usize) -> Result<QueryResult> {
        self.ensure_connected()?;
        let mut result = QueryResult::empty();
        result.is_select = sql.trim_start().to_uppercase().starts_with("SELECT");
        Ok(result)
    }

    async fn explain(&self, _sql: &str) -> Result<ExplainRows> {
        self.ensure_connected()?;
        Ok(ExplainRows::default())
    }

    async fn server_metrics(&self) -> Result<ServerMetrics> {
        self.ensure_connected()?;
        Ok(ServerMetrics::default())
    }
}
