//! Framework plugin registry and project detection.
//!
//! A plugin teaches the core one framework's dialect: how to recognize a
//! project on disk, how to turn raw log lines into structured entries, what
//! processes to run by default, and how to phrase recommendations. Plugins
//! are plain trait objects registered at startup — no dynamic loading, no
//! runtime reflection. Detection scans the project root for filesystem
//! signatures; the first registered plugin that matches wins, ties broken
//! by registration order.

use crate::query::{QueryStatistic, SmartRecommendation};
use ry_common::{LogLine, ParsedEntry, ProcessDefinition};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// A framework integration.
///
/// `parse_line` is called from the log pipeline's single writer, one line
/// at a time per process; implementations carry their own interior state
/// (open requests, backtrace accumulation) behind a lock.
pub trait FrameworkPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Whether the project at `root` is built on this framework.
    fn detect(&self, root: &Path) -> bool;

    /// Parse one attributed log line into structured entries.
    ///
    /// Usually yields zero or one entry. A line that terminates a buffered
    /// multi-line construct (an exception backtrace) can yield two: the
    /// flushed construct plus the line's own entry.
    fn parse_line(&self, line: &LogLine) -> Vec<ParsedEntry>;

    /// Default process definitions for a detected project.
    fn default_processes(&self, root: &Path) -> Vec<ProcessDefinition>;

    /// Framework-specific phrasing of the recommendation digest.
    fn recommendations(&self, stats: &[QueryStatistic]) -> Vec<SmartRecommendation>;
}

/// Holds registered plugins and the active selection.
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn FrameworkPlugin>>>,
    active: RwLock<Option<Arc<dyn FrameworkPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            active: RwLock::new(None),
        }
    }

    /// Register a plugin. Order matters: earlier registrations win ties.
    pub fn register(&self, plugin: Arc<dyn FrameworkPlugin>) {
        debug!(plugin = plugin.name(), version = plugin.version(), "plugin registered");
        self.plugins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(plugin);
    }

    /// Scan `root` and activate the first matching plugin.
    pub fn detect(&self, root: &Path) -> Option<Arc<dyn FrameworkPlugin>> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        let found = plugins.iter().find(|p| p.detect(root)).cloned();
        drop(plugins);

        if let Some(ref plugin) = found {
            info!(plugin = plugin.name(), root = %root.display(), "framework detected");
            *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(plugin));
        }
        found
    }

    /// Activate a plugin by name (config pin), bypassing detection.
    pub fn activate(&self, name: &str) -> Option<Arc<dyn FrameworkPlugin>> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        let found = plugins.iter().find(|p| p.name() == name).cloned();
        drop(plugins);

        if let Some(ref plugin) = found {
            *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(plugin));
        }
        found
    }

    /// The currently active plugin, if any.
    pub fn active(&self) -> Option<Arc<dyn FrameworkPlugin>> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of all registered plugins, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
