//! Typed configuration structs for `.railyard.toml`.
//!
//! File keys are camelCase (the schema predates this implementation).
//! Unknown keys at every level are captured in flattened `toml::Table`s so
//! a load/modify/save round-trip never loses sections we do not understand.

use ry_common::{ProcessDefinition, SshServer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Hard cap on concurrent SSH sessions, regardless of configuration.
pub const SSH_SESSION_HARD_CAP: usize = 10;

/// Complete project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RailyardConfig {
    /// Detected or pinned framework plugin name (e.g. "rails").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// `[processes.<name>]` definitions, keyed by process name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, ProcessConfig>,

    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub ssh: SshSection,

    /// Sections we do not model; preserved byte-for-byte on rewrite
    /// (modulo canonical TOML formatting).
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// One `[processes.<name>]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub auto_restart: bool,

    #[serde(default)]
    pub use_pty: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ProcessConfig {
    /// Convert into a supervisor definition under the given name.
    pub fn to_definition(&self, name: &str) -> ProcessDefinition {
        ProcessDefinition {
            name: name.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: self.environment.clone(),
            auto_restart: self.auto_restart,
            use_pty: self.use_pty,
            color: self.color.clone(),
        }
    }
}

/// `[database]` section: saved connections and queries.
///
/// Passwords are never written to disk; a saved connection holds everything
/// except the credential, which the host prompts for at connect time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub saved_connections: Vec<SavedConnection>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub saved_queries: Vec<SavedQuery>,

    #[serde(flatten)]
    pub extra: toml::Table,
}

/// A persisted database connection (credential-free).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConnection {
    pub name: String,
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

/// A persisted named query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    pub id: String,
    pub name: String,
    pub sql: String,
}

/// `[ssh]` section: session manager tunables and saved servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSection {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Connect deadline in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base reconnect backoff in seconds (doubles per attempt).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: u64,

    /// Keepalive/health sampling interval in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// Per-session log cap in lines.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub saved_servers: Vec<SshServer>,

    #[serde(flatten)]
    pub extra: toml::Table,
}

fn default_max_sessions() -> usize {
    5
}
fn default_connection_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    1
}
fn default_keepalive_interval() -> u64 {
    10
}
fn default_max_log_entries() -> usize {
    10_000
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            connection_timeout: default_connection_timeout(),
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
            keepalive_interval: default_keepalive_interval(),
            max_log_entries: default_max_log_entries(),
            saved_servers: Vec::new(),
            extra: toml::Table::new(),
        }
    }
}

impl SshSection {
    /// Configured session limit, clamped to the hard cap.
    pub fn effective_max_sessions(&self) -> usize {
        self.max_sessions.clamp(1, SSH_SESSION_HARD_CAP)
    }
}

impl RailyardConfig {
    /// Semantic validation. Returns human-readable warnings; none are fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, proc) in &self.processes {
            if proc.command.trim().is_empty() {
                warnings.push(format!("process '{}' has an empty command", name));
            }
        }

        if self.ssh.max_sessions > SSH_SESSION_HARD_CAP {
            warnings.push(format!(
                "ssh.maxSessions {} exceeds the hard cap of {}; clamping",
                self.ssh.max_sessions, SSH_SESSION_HARD_CAP
            ));
        }
        if self.ssh.max_sessions == 0 {
            warnings.push("ssh.maxSessions is 0; raising to 1".to_string());
        }

        for server in &self.ssh.saved_servers {
            if server.host.trim().is_empty() {
                warnings.push(format!("ssh server '{}' has an empty host", server.name));
            }
        }

        warnings
    }

    /// Process definitions seeded from the `[processes]` table.
    pub fn process_definitions(&self) -> Vec<ProcessDefinition> {
        self.processes
            .iter()
            .map(|(name, cfg)| cfg.to_definition(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RailyardConfig::default();
        assert_eq!(config.ssh.max_sessions, 5);
        assert_eq!(config.ssh.connection_timeout, 10);
        assert_eq!(config.ssh.max_log_entries, 10_000);
        assert!(config.processes.is_empty());
    }

    #[test]
    fn test_max_sessions_clamped_to_hard_cap() {
        let mut section = SshSection::default();
        section.max_sessions = 50;
        assert_eq!(section.effective_max_sessions(), SSH_SESSION_HARD_CAP);
        section.max_sessions = 0;
        assert_eq!(section.effective_max_sessions(), 1);
    }

    #[test]
    fn test_parse_full_config() {
        let text = r#"
            framework = "rails"
            projectName = "shop"

            [processes.web]
            command = "bundle"
            args = ["exec", "rails", "server"]
            autoRestart = true
            usePty = true

            [processes.worker]
            command = "bundle"
            args = ["exec", "sidekiq"]

            [database]
            savedQueries = [{ id = "q1", name = "count users", sql = "SELECT COUNT(*) FROM users" }]

            [ssh]
            maxSessions = 3
        "#;
        let config: RailyardConfig = toml::from_str(text).unwrap();
        assert_eq!(config.framework.as_deref(), Some("rails"));
        assert_eq!(config.processes.len(), 2);
        assert!(config.processes["web"].auto_restart);
        assert_eq!(config.database.saved_queries.len(), 1);
        assert_eq!(config.ssh.max_sessions, 3);
    }

    #[test]
    fn test_unknown_sections_preserved() {
        let text = r#"
            framework = "rails"

            [editor]
            theme = "solarized"
        "#;
        let config: RailyardConfig = toml::from_str(text).unwrap();
        assert!(config.extra.contains_key("editor"));

        let rewritten = toml::to_string(&config).unwrap();
        assert!(rewritten.contains("[editor]"));
        assert!(rewritten.contains("solarized"));
    }

    #[test]
    fn test_to_definition_carries_everything() {
        let mut cfg = ProcessConfig::default();
        cfg.command = "bin/vite".to_string();
        cfg.args = vec!["dev".to_string()];
        cfg.use_pty = true;
        let def = cfg.to_definition("vite");
        assert_eq!(def.name, "vite");
        assert_eq!(def.command, "bin/vite");
        assert!(def.use_pty);
    }

    #[test]
    fn test_validate_flags_empty_command() {
        let mut config = RailyardConfig::default();
        config
            .processes
            .insert("bad".to_string(), ProcessConfig::default());
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bad"));
    }
}
