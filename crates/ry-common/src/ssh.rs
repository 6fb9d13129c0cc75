//! Persisted SSH server definitions.
//!
//! These are the `[ssh].savedServers` entries from the project config; the
//! in-memory session types live in `ry-core::ssh`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How to authenticate to a saved server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Ask the local SSH agent first.
    Agent,
    /// Use the configured private key file.
    Key,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Agent
    }
}

/// A persisted SSH server definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshServer {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Required when `auth_method` is `Key`; also the fallback when the
    /// agent socket is unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
}

fn default_port() -> u16 {
    22
}

impl SshServer {
    pub fn new(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: format!("srv-{}", uuid::Uuid::new_v4().to_string().chars().take(8).collect::<String>()),
            name: name.into(),
            host: host.into(),
            port: 22,
            username: username.into(),
            auth_method: AuthMethod::Agent,
            private_key_path: None,
            tags: Vec::new(),
            env: HashMap::new(),
            created_at: Utc::now(),
            last_connected: None,
        }
    }
}
