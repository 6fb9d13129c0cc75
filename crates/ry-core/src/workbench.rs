//! The workbench: subsystem wiring and the host-facing surface.
//!
//! Builds the three process-wide singletons (config, plugin registry,
//! worker pool) plus the managers, connects the supervisor's output hooks
//! to the log pipeline, and fans everything observable out as
//! [`WorkbenchEvent`]s over a lossy broadcast channel. The host (GUI,
//! TUI, or test harness) talks to this type and nothing deeper.

use crate::db::{ConnectionConfig, ConnectionStatus, DatabaseDriver, DatabaseGateway};
use crate::exceptions::{ExceptionRecord, ExceptionTracker};
use crate::logs::{LogFilter, LogPipeline};
use crate::metrics::{MetricsSnapshot, MetricsTracker};
use crate::plugin::PluginRegistry;
use crate::query::{
    N1Warning, QueryAnalyzer, QueryDistribution, QueryStatistic, RequestQueryGroup,
    SmartRecommendation,
};
use crate::rails::RailsPlugin;
use crate::security::{CommandGate, PathGate, RateLimiter};
use crate::ssh::{
    SessionSnapshot, SshConfig, SshHooks, SshSessionManager, TunnelSpec,
};
use crate::supervisor::{
    InstanceSnapshot, ManagerConfig, OutputHooks, ProcessManager, RestartPolicy,
};
use crate::workers::{WorkerPool, WorkerPoolStats};
use ry_common::{
    Error, ExceptionId, ExportFormat, Fingerprint, LogLine, ProcessDefinition, ProcessStatus,
    Result, SessionId, SshServer, TunnelId,
};
use ry_config::{ConfigStore, RailyardConfig, SavedQuery};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Host-facing event stream. Lossy under back-pressure by design.
#[derive(Debug, Clone)]
pub enum WorkbenchEvent {
    ProcessLog(LogLine),
    ProcessStatus {
        name: String,
        status: ProcessStatus,
    },
    ProcessError {
        name: String,
        error: String,
    },
    ConsoleOutput {
        process: String,
        bytes: Vec<u8>,
    },
    DatabaseConnected {
        database: String,
    },
    DatabaseDisconnected,
    SshOutput {
        session: SessionId,
        bytes: Vec<u8>,
    },
    SshHealth {
        session: SessionId,
        avg_ms: f64,
        current_ms: f64,
    },
    SshDisconnect {
        session: SessionId,
    },
}

const EVENT_CHANNEL_DEPTH: usize = 4096;

/// Everything wired together.
pub struct Workbench {
    project_root: PathBuf,
    config: Mutex<RailyardConfig>,
    store: ConfigStore,
    events: broadcast::Sender<WorkbenchEvent>,
    pub plugins: Arc<PluginRegistry>,
    pub analyzer: Arc<QueryAnalyzer>,
    pub exceptions: Arc<ExceptionTracker>,
    pub metrics: Arc<MetricsTracker>,
    pub pipeline: Arc<LogPipeline>,
    pub processes: Arc<ProcessManager>,
    pub database: Arc<DatabaseGateway>,
    pub ssh: Arc<SshSessionManager>,
    pub workers: Arc<WorkerPool>,
    tickers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Workbench {
    /// Assemble the full stack for a project root. Must run inside a tokio
    /// runtime; background tickers start immediately.
    pub fn new(
        project_root: impl AsRef<Path>,
        config: RailyardConfig,
        driver: Arc<dyn DatabaseDriver>,
    ) -> Arc<Self> {
        let project_root = project_root.as_ref().to_path_buf();
        let store = ConfigStore::new(&project_root);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);

        let plugins = Arc::new(PluginRegistry::new());
        plugins.register(Arc::new(RailsPlugin::new()));
        match config.framework.as_deref() {
            Some(name) => {
                if plugins.activate(name).is_none() {
                    warn!(framework = name, "configured framework has no plugin");
                    plugins.detect(&project_root);
                }
            }
            None => {
                plugins.detect(&project_root);
            }
        }

        let analyzer = Arc::new(QueryAnalyzer::new());
        let exceptions = Arc::new(ExceptionTracker::new());
        let metrics = Arc::new(MetricsTracker::new());
        let pipeline = Arc::new(LogPipeline::new(
            Arc::clone(&plugins),
            Arc::clone(&analyzer),
            Arc::clone(&exceptions),
            Arc::clone(&metrics),
        ));
        let limiter = Arc::new(RateLimiter::new());
        let workers = Arc::new(WorkerPool::new());

        let hooks = {
            let pipeline = Arc::clone(&pipeline);
            let events = events.clone();
            let events_console = events.clone();
            let events_status = events.clone();
            let events_error = events.clone();
            OutputHooks {
                on_line: Arc::new(move |process, line| {
                    let (stored, _) = pipeline.ingest(process, line);
                    let _ = events.send(WorkbenchEvent::ProcessLog(stored));
                }),
                on_console: Arc::new(move |process, bytes| {
                    let _ = events_console.send(WorkbenchEvent::ConsoleOutput {
                        process: process.to_string(),
                        bytes: bytes.to_vec(),
                    });
                }),
                on_status: Arc::new(move |name, status| {
                    let _ = events_status.send(WorkbenchEvent::ProcessStatus {
                        name: name.to_string(),
                        status,
                    });
                }),
                on_error: Arc::new(move |name, error| {
                    let _ = events_error.send(WorkbenchEvent::ProcessError {
                        name: name.to_string(),
                        error: ry_redact::sanitize(error),
                    });
                }),
            }
        };

        let processes = Arc::new(ProcessManager::new(ManagerConfig {
            hooks,
            policy: RestartPolicy::default(),
            command_gate: Some(CommandGate::with_defaults()),
            path_gate: Some(PathGate::with_defaults(&project_root)),
            limiter: Some(Arc::clone(&limiter)),
        }));

        let database = Arc::new(DatabaseGateway::new(
            driver,
            Arc::clone(&analyzer),
            Arc::clone(&workers),
            Some(Arc::clone(&limiter)),
        ));

        let ssh_hooks = {
            let events_output = events.clone();
            let events_health = events.clone();
            let events_disconnect = events.clone();
            SshHooks {
                on_output: Arc::new(move |session, bytes| {
                    let _ = events_output.send(WorkbenchEvent::SshOutput {
                        session: session.clone(),
                        bytes: bytes.to_vec(),
                    });
                }),
                on_status: Arc::new(|_, _| {}),
                on_health: Arc::new(move |session, health| {
                    let _ = events_health.send(WorkbenchEvent::SshHealth {
                        session: session.clone(),
                        avg_ms: health.avg_ms,
                        current_ms: health.current_ms,
                    });
                }),
                on_disconnect: Arc::new(move |session| {
                    let _ = events_disconnect.send(WorkbenchEvent::SshDisconnect {
                        session: session.clone(),
                    });
                }),
            }
        };
        let ssh = Arc::new(SshSessionManager::new(
            SshConfig::from(&config.ssh),
            ssh_hooks,
        ));

        let workbench = Arc::new(Self {
            project_root,
            config: Mutex::new(config),
            store,
            events,
            plugins,
            analyzer,
            exceptions,
            metrics,
            pipeline,
            processes,
            database,
            ssh,
            workers,
            tickers: Mutex::new(Vec::new()),
        });
        workbench.spawn_tickers();
        workbench
    }

    fn spawn_tickers(self: &Arc<Self>) {
        let mut tickers = self.tickers.lock().unwrap_or_else(|e| e.into_inner());

        // Request groups that never saw a completion line.
        let analyzer = Arc::clone(&self.analyzer);
        tickers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                analyzer.expire_idle();
            }
        }));

        // One metrics point per minute.
        let metrics = Arc::clone(&self.metrics);
        tickers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (cpu, memory) = sample_host();
                metrics.sample(cpu, memory);
            }
        }));
    }

    /// Subscribe to the host event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent> {
        self.events.subscribe()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Seed the supervisor from config, Procfile, and plugin defaults, in
    /// that precedence order.
    pub fn seed_processes(&self) -> usize {
        let base_env = ry_config::load_env(self.project_root.join(".env"));

        let mut defs: Vec<ProcessDefinition> = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.process_definitions()
        };

        if defs.is_empty() {
            let procfile_path = self.project_root.join("Procfile");
            if procfile_path.is_file() {
                if let Ok(procfile) = ry_config::Procfile::parse(&procfile_path) {
                    defs = procfile.to_definitions(&base_env);
                }
            }
        }

        if defs.is_empty() {
            if let Some(plugin) = self.plugins.active() {
                defs = plugin.default_processes(&self.project_root);
            }
        }

        let mut added = 0;
        for mut def in defs {
            for (key, value) in &base_env {
                def.env.entry(key.clone()).or_insert_with(|| value.clone());
            }
            match self.processes.add(def) {
                Ok(()) => added += 1,
                Err(err) => warn!("process rejected: {}", err),
            }
        }
        info!(count = added, "processes seeded");
        added
    }

    // ── Logs surface ────────────────────────────────────────────────────

    pub fn logs(&self, filter: &LogFilter) -> Vec<LogLine> {
        self.pipeline.snapshot(filter)
    }

    pub fn clear_logs(&self) {
        self.pipeline.clear();
    }

    pub fn export_logs(&self, filter: &LogFilter) -> String {
        self.pipeline.export_plain(filter)
    }

    // ── Database surface ────────────────────────────────────────────────

    pub async fn db_connect(&self, config: ConnectionConfig) -> Result<()> {
        let database = config.database.clone();
        self.database.connect(config).await?;
        let _ = self.events.send(WorkbenchEvent::DatabaseConnected { database });
        Ok(())
    }

    pub async fn db_disconnect(&self) -> Result<()> {
        self.database.disconnect().await?;
        let _ = self.events.send(WorkbenchEvent::DatabaseDisconnected);
        Ok(())
    }

    pub fn db_status(&self) -> ConnectionStatus {
        self.database.status()
    }

    // ── Saved queries (persisted) ───────────────────────────────────────

    pub fn list_saved_queries(&self) -> Vec<SavedQuery> {
        self.config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .database
            .saved_queries
            .clone()
    }

    pub fn save_query(&self, name: &str, sql: &str) -> String {
        let id = format!("qry-{}", uuid_suffix());
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.database.saved_queries.push(SavedQuery {
            id: id.clone(),
            name: name.to_string(),
            sql: sql.to_string(),
        });
        self.persist(&config);
        id
    }

    pub fn delete_saved_query(&self, id: &str) -> bool {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        let before = config.database.saved_queries.len();
        config.database.saved_queries.retain(|q| q.id != id);
        let removed = config.database.saved_queries.len() != before;
        if removed {
            self.persist(&config);
        }
        removed
    }

    // ── Query analytics surface ─────────────────────────────────────────

    pub fn smart_recommendations(&self) -> Vec<SmartRecommendation> {
        let stats = self.analyzer.statistics();
        match self.plugins.active() {
            Some(plugin) => plugin.recommendations(&stats),
            None => self.analyzer.recommendations(),
        }
    }

    pub fn n1_warnings(&self) -> Vec<N1Warning> {
        self.analyzer.n1_warnings()
    }

    pub fn request_query_groups(&self, limit: usize) -> Vec<RequestQueryGroup> {
        self.analyzer.request_groups(limit)
    }

    pub fn query_distribution(&self) -> QueryDistribution {
        self.analyzer.distribution()
    }

    pub fn ignore_query_pattern(&self, fingerprint: Fingerprint) {
        self.analyzer.ignore_pattern(fingerprint);
    }

    pub fn query_statistics(&self) -> Vec<QueryStatistic> {
        self.analyzer.statistics()
    }

    pub async fn compare_query_plans(
        &self,
        original: &str,
        optimized: &str,
    ) -> Result<crate::db::PlanComparison> {
        self.database.compare_plans(original, optimized).await
    }

    // ── Exceptions surface ──────────────────────────────────────────────

    pub fn exceptions_list(&self) -> Vec<ExceptionRecord> {
        self.exceptions.list()
    }

    pub fn exception_resolve(&self, id: &ExceptionId) -> bool {
        self.exceptions.resolve(id)
    }

    pub fn exception_ignore(&self, id: &ExceptionId) -> bool {
        self.exceptions.ignore(id)
    }

    pub fn exceptions_clear(&self) {
        self.exceptions.clear();
    }

    // ── Metrics / workers surface ───────────────────────────────────────

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_reset(&self) {
        self.metrics.reset();
    }

    pub fn worker_stats(&self) -> WorkerPoolStats {
        self.workers.stats()
    }

    // ── Process surface (thin passthroughs) ─────────────────────────────

    pub fn process_list(&self) -> Vec<InstanceSnapshot> {
        self.processes.snapshot()
    }

    pub fn process_get(&self, name: &str) -> Result<InstanceSnapshot> {
        self.processes.get_snapshot(name)
    }

    // ── SSH surface ─────────────────────────────────────────────────────

    pub fn list_servers(&self) -> Vec<SshServer> {
        self.config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ssh
            .saved_servers
            .clone()
    }

    pub fn save_server(&self, server: SshServer) -> String {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        let id = server.id.clone();
        config.ssh.saved_servers.retain(|s| s.id != server.id);
        config.ssh.saved_servers.push(server);
        self.persist(&config);
        id
    }

    pub fn delete_server(&self, id: &str) -> bool {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        let before = config.ssh.saved_servers.len();
        config.ssh.saved_servers.retain(|s| s.id != id);
        let removed = config.ssh.saved_servers.len() != before;
        if removed {
            self.persist(&config);
        }
        removed
    }

    pub async fn ssh_connect(&self, server_id: &str) -> Result<SessionId> {
        let server = self
            .list_servers()
            .into_iter()
            .find(|s| s.id == server_id)
            .ok_or_else(|| Error::UnknownSession {
                id: server_id.to_string(),
            })?;
        let session_id = self.ssh.create_session(server).await?;

        // Stamp last_connected on the saved server.
        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(saved) = config.ssh.saved_servers.iter_mut().find(|s| s.id == server_id) {
                saved.last_connected = Some(chrono::Utc::now());
            }
            self.persist(&config);
        }
        Ok(session_id)
    }

    pub async fn ssh_disconnect(&self, session: &SessionId) -> Result<()> {
        self.ssh.close_session(session).await
    }

    pub async fn ssh_write(&self, session: &SessionId, bytes: &[u8]) -> Result<()> {
        self.ssh.write(session, bytes).await
    }

    pub async fn ssh_resize(&self, session: &SessionId, rows: u16, cols: u16) -> Result<()> {
        self.ssh.resize(session, rows, cols).await
    }

    pub async fn ssh_create_tunnel(
        &self,
        session: &SessionId,
        spec: TunnelSpec,
    ) -> Result<TunnelId> {
        self.ssh.create_tunnel(session, spec).await
    }

    pub async fn ssh_export(&self, session: &SessionId, format: ExportFormat) -> Result<String> {
        self.ssh.export_session(session, format).await
    }

    pub async fn ssh_list(&self) -> Vec<SessionSnapshot> {
        self.ssh.list().await
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Orderly teardown: processes, then sessions, then workers.
    pub async fn shutdown(&self) {
        self.processes.shutdown().await;
        self.ssh.shutdown().await;
        if !self.workers.close_with_timeout(Duration::from_secs(5)) {
            warn!("worker pool did not drain before deadline");
        }
        for ticker in self.tickers.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            ticker.abort();
        }
        info!("workbench shut down");
    }

    fn persist(&self, config: &RailyardConfig) {
        if let Err(err) = self.store.save(config) {
            // Save failures surface but never abort the caller.
            warn!("config save failed: {}", err);
        }
    }
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().to_string().chars().take(8).collect()
}

/// Best-effort host resource sample for the metrics series.
#[cfg(target_os = "linux")]
fn sample_host() -> (f64, f64) {
    let cpu = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|f| f.parse().ok()))
        .unwrap_or(0.0);
    let memory = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| {
            let mut total = None;
            let mut available = None;
            for line in s.lines() {
                let mut parts = line.split_whitespace();
                match parts.next() {
                    Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<f64>().ok()),
                    Some("MemAvailable:") => {
                        available = parts.next().and_then(|v| v.parse::<f64>().ok())
                    }
                    _ => {}
                }
            }
            match (total, available) {
                (Some(total), Some(available)) if total > 0.0 => {
                    Some((total - available) / total * 100.0)
                }
                _ => None,
            }
        })
        .unwrap_or(0.0);
    (cpu, memory)
}

#[cfg(not(target_os = "linux"))]
fn sample_host() -> (f64, f64) {
    (0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NullDriver;

    fn workbench_in(dir: &Path) -> Arc<Workbench> {
        Workbench::new(dir, RailyardConfig::default(), Arc::new(NullDriver::new()))
    }

    #[tokio::test]
    async fn test_seed_from_config_processes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RailyardConfig::default();
        config.processes.insert("web".to_string(), {
            let mut p = ry_config::ProcessConfig::default();
            p.command = "echo".to_string();
            p.args = vec!["hi".to_string()];
            p
        });
        let workbench = Workbench::new(dir.path(), config, Arc::new(NullDriver::new()));
        assert_eq!(workbench.seed_processes(), 1);
        assert_eq!(workbench.process_list().len(), 1);
        workbench.shutdown().await;
    }

    #[tokio::test]
    async fn test_seed_from_procfile_when_config_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Procfile"), "web: echo procfile-web\n").unwrap();
        let workbench = workbench_in(dir.path());
        assert_eq!(workbench.seed_processes(), 1);
        let snapshot = workbench.process_get("web").unwrap();
        assert_eq!(snapshot.definition.command, "echo");
        workbench.shutdown().await;
    }

    #[tokio::test]
    async fn test_env_file_merged_into_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "RAILS_ENV=development\n").unwrap();
        std::fs::write(dir.path().join("Procfile"), "web: echo hi\n").unwrap();
        let workbench = workbench_in(dir.path());
        workbench.seed_processes();
        let snapshot = workbench.process_get("web").unwrap();
        assert_eq!(
            snapshot.definition.env.get("RAILS_ENV").map(String::as_str),
            Some("development")
        );
        workbench.shutdown().await;
    }

    #[tokio::test]
    async fn test_saved_queries_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let workbench = workbench_in(dir.path());
        let id = workbench.save_query("count users", "SELECT COUNT(*) FROM users");
        assert_eq!(workbench.list_saved_queries().len(), 1);

        // Persisted to disk with owner-only permissions.
        let reloaded = ConfigStore::new(dir.path()).load().unwrap();
        assert_eq!(reloaded.database.saved_queries.len(), 1);

        assert!(workbench.delete_saved_query(&id));
        assert!(workbench.list_saved_queries().is_empty());
        workbench.shutdown().await;
    }

    #[tokio::test]
    async fn test_database_events_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let workbench = workbench_in(dir.path());
        let mut events = workbench.subscribe();

        workbench
            .db_connect(ConnectionConfig {
                driver: "null".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                user: "dev".to_string(),
                password: String::new(),
                database: "app_dev".to_string(),
                ssl_mode: None,
            })
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            WorkbenchEvent::DatabaseConnected { database } => assert_eq!(database, "app_dev"),
            other => panic!("unexpected event: {:?}", other),
        }
        workbench.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_crud() {
        let dir = tempfile::tempdir().unwrap();
        let workbench = workbench_in(dir.path());
        let server = SshServer::new("staging", "staging.internal", "deploy");
        let id = workbench.save_server(server);
        assert_eq!(workbench.list_servers().len(), 1);
        assert!(workbench.delete_server(&id));
        assert!(workbench.list_servers().is_empty());
        workbench.shutdown().await;
    }
}
