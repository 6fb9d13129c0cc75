//! Process definition and status types.
//!
//! A `ProcessDefinition` is immutable once registered with the supervisor;
//! the mutable runtime side (`ProcessInstance`) lives in ry-core.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How to launch and treat one managed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Unique name (map key in the supervisor and the config file).
    pub name: String,
    /// Executable to run. Spawned directly, never through a shell.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; resolved and confined by the security gates.
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Restart on unexpected exit, with exponential backoff.
    #[serde(default)]
    pub auto_restart: bool,
    /// Attach the child to a pseudo-terminal instead of plain pipes.
    #[serde(default)]
    pub use_pty: bool,
    /// Display color hint for the host UI.
    #[serde(default)]
    pub color: Option<String>,
}

impl ProcessDefinition {
    /// Minimal definition with everything else defaulted.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            auto_restart: false,
            use_pty: false,
            color: None,
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    pub fn with_pty(mut self, use_pty: bool) -> Self {
        self.use_pty = use_pty;
        self
    }
}

/// Lifecycle state of a process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl ProcessStatus {
    /// States in which the instance holds a live child (and therefore a pid).
    pub fn has_pid(self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
        )
    }

    /// Whether `start` is legal from this state.
    pub fn can_start(self) -> bool {
        matches!(
            self,
            ProcessStatus::Idle | ProcessStatus::Stopped | ProcessStatus::Crashed
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Idle => "idle",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Crashed => "crashed",
        };
        write!(f, "{}", s)
    }
}
