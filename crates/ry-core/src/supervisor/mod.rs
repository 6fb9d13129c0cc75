//! Process supervisor: lifecycle state machine, restart policy, output
//! fan-out.
//!
//! State machine per instance:
//!
//! ```text
//! idle ──start──▶ starting ──(child ready)──▶ running
//! starting ──(spawn fails)──▶ crashed
//! running ──stop──▶ stopping ──(exit)──▶ stopped
//! running ──(child exits, auto_restart)──▶ starting (after backoff)
//! running ──(child exits, otherwise)──▶ crashed
//! ```
//!
//! Restart backoff starts at 1 s, doubles to 30 s, and resets after a run
//! that survives 60 s; ten consecutive failures settle the instance in
//! `crashed`. `stop` is SIGTERM, 5 s grace, SIGKILL; `shutdown` stops
//! everything in parallel under a global 10 s deadline.

mod instance;
pub mod types;

pub use instance::{Backend, Instance, STOP_GRACE};
pub use types::{InstanceSnapshot, LineAssembler, OutputHooks, RestartPolicy};

use crate::security::{CommandGate, PathGate, RateCategory, RateLimiter};
use ry_common::{Error, ProcessDefinition, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Global deadline for `shutdown`.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Supervisor construction parameters.
pub struct ManagerConfig {
    pub hooks: OutputHooks,
    pub policy: RestartPolicy,
    /// Command/argument gate applied at registration. `None` disables.
    pub command_gate: Option<CommandGate>,
    /// Working-directory confinement applied at registration.
    pub path_gate: Option<PathGate>,
    /// Rate limiter for lifecycle and PTY operations.
    pub limiter: Option<Arc<RateLimiter>>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hooks: OutputHooks::noop(),
            policy: RestartPolicy::default(),
            command_gate: None,
            path_gate: None,
            limiter: None,
        }
    }
}

/// Maintains the mapping from process name to supervised instance.
pub struct ProcessManager {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    hooks: OutputHooks,
    policy: RestartPolicy,
    command_gate: Option<CommandGate>,
    path_gate: Option<PathGate>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ProcessManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            hooks: config.hooks,
            policy: config.policy,
            command_gate: config.command_gate,
            path_gate: config.path_gate,
            limiter: config.limiter,
        }
    }

    fn check_rate(&self, category: RateCategory) -> Result<()> {
        match self.limiter {
            Some(ref limiter) => limiter.check(category),
            None => Ok(()),
        }
    }

    fn get(&self, name: &str) -> Result<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProcess {
                name: name.to_string(),
            })
    }

    /// Register a definition. Security gates run here, once, so a
    /// definition that made it into the table is safe to start repeatedly.
    pub fn add(&self, def: ProcessDefinition) -> Result<()> {
        if let Some(ref gate) = self.command_gate {
            gate.check(&def.command, &def.args)?;
        }
        if let (Some(gate), Some(dir)) = (self.path_gate.as_ref(), def.working_dir.as_deref()) {
            gate.check(dir)?;
        }

        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        if instances.contains_key(&def.name) {
            return Err(Error::DuplicateProcess { name: def.name });
        }
        info!(process = %def.name, command = %def.command, "process registered");
        instances.insert(def.name.clone(), Arc::new(Instance::new(def)));
        Ok(())
    }

    /// Stop (if needed) and remove a definition.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let instance = self.get(name)?;
        if instance.status().has_pid() {
            let _ = instance.stop(&self.hooks).await;
            instance.join(STOP_GRACE + Duration::from_secs(1)).await;
        }
        instance.abort();
        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        debug!(process = %name, "process removed");
        Ok(())
    }

    /// Start a registered process.
    pub fn start(&self, name: &str) -> Result<()> {
        self.check_rate(RateCategory::Process)?;
        let instance = self.get(name)?;
        if instance.is_active() || !instance.status().can_start() {
            return Err(Error::AlreadyRunning {
                name: name.to_string(),
            });
        }
        instance.launch(self.hooks.clone(), self.policy);
        Ok(())
    }

    /// Stop a running process.
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.check_rate(RateCategory::Process)?;
        let instance = self.get(name)?;
        instance.stop(&self.hooks).await?;
        instance.join(STOP_GRACE + Duration::from_secs(1)).await;
        Ok(())
    }

    /// Stop (when running) then start.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.check_rate(RateCategory::Process)?;
        let instance = self.get(name)?;
        if instance.status().has_pid() {
            instance.stop(&self.hooks).await?;
        }
        instance.join(STOP_GRACE + Duration::from_secs(1)).await;
        if instance.is_active() || !instance.status().can_start() {
            return Err(Error::AlreadyRunning {
                name: name.to_string(),
            });
        }
        instance.launch(self.hooks.clone(), self.policy);
        Ok(())
    }

    /// Start every registered process that is startable.
    pub fn start_all(&self) -> Vec<(String, Result<()>)> {
        let names: Vec<String> = {
            let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
            instances.keys().cloned().collect()
        };
        names
            .into_iter()
            .map(|name| {
                let outcome = self.start(&name);
                (name, outcome)
            })
            .collect()
    }

    /// Stop every running process, in parallel.
    pub async fn stop_all(&self) {
        let instances: Vec<Arc<Instance>> = {
            let map = self.instances.read().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        // Tasks parked in restart backoff have no child to signal.
        for instance in instances.iter().filter(|i| !i.status().has_pid()) {
            instance.abort();
        }

        let hooks = &self.hooks;
        let stops = instances.iter().filter(|i| i.status().has_pid()).map(|i| {
            let instance = Arc::clone(i);
            async move {
                if let Err(err) = instance.stop(hooks).await {
                    warn!(process = %instance.def.name, "stop failed: {}", err);
                }
                instance.join(STOP_GRACE + Duration::from_secs(1)).await;
            }
        });
        futures::future::join_all(stops).await;
    }

    /// Write bytes to a process's terminal or stdin.
    pub async fn write_pty(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.check_rate(RateCategory::Pty)?;
        let instance = self.get(name)?;
        let backend = instance.backend().ok_or_else(|| Error::NotRunning {
            name: name.to_string(),
        })?;
        backend.write(bytes).await
    }

    /// Resize a process's terminal.
    pub fn resize_pty(&self, name: &str, rows: u16, cols: u16) -> Result<()> {
        self.check_rate(RateCategory::Pty)?;
        let instance = self.get(name)?;
        let backend = instance.backend().ok_or_else(|| Error::NotRunning {
            name: name.to_string(),
        })?;
        backend.resize(rows, cols)
    }

    /// Snapshot of every instance.
    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<InstanceSnapshot> = instances.values().map(|i| i.snapshot()).collect();
        all.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        all
    }

    /// Snapshot of one instance.
    pub fn get_snapshot(&self, name: &str) -> Result<InstanceSnapshot> {
        Ok(self.get(name)?.snapshot())
    }

    /// Stop everything under the global shutdown deadline.
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");
        if tokio::time::timeout(SHUTDOWN_DEADLINE, self.stop_all())
            .await
            .is_err()
        {
            warn!("shutdown deadline expired with processes still settling");
        }
    }
}
