//! Rails framework plugin: detection, log parsing, default processes.
//!
//! The reference implementation of [`FrameworkPlugin`]. Detection looks
//! for the classic filesystem signature (`Gemfile` plus
//! `config/application.rb`); default processes are inferred from what the
//! project actually ships (`bin/vite`, a sidekiq Gemfile entry).

pub mod parser;

use crate::plugin::FrameworkPlugin;
use crate::query::{recommend, QueryStatistic, SmartRecommendation};
use parser::RailsLogParser;
use ry_common::{LogLine, ParsedEntry, ProcessDefinition};
use std::path::Path;
use tracing::debug;

/// The Rails plugin.
pub struct RailsPlugin {
    parser: RailsLogParser,
}

impl RailsPlugin {
    pub fn new() -> Self {
        Self {
            parser: RailsLogParser::new(),
        }
    }
}

impl Default for RailsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkPlugin for RailsPlugin {
    fn name(&self) -> &str {
        "rails"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn detect(&self, root: &Path) -> bool {
        root.join("Gemfile").is_file() && root.join("config").join("application.rb").is_file()
    }

    fn parse_line(&self, line: &LogLine) -> Vec<ParsedEntry> {
        self.parser.parse(line)
    }

    fn default_processes(&self, root: &Path) -> Vec<ProcessDefinition> {
        let mut defs = Vec::new();

        let mut web = ProcessDefinition::new("web", "bundle")
            .with_args(&["exec", "rails", "server", "-p", "3000"])
            .with_auto_restart(true)
            .with_pty(true);
        web.color = Some("green".to_string());
        defs.push(web);

        let gemfile = std::fs::read_to_string(root.join("Gemfile")).unwrap_or_default();
        if gemfile.contains("sidekiq") {
            let mut worker = ProcessDefinition::new("worker", "bundle")
                .with_args(&["exec", "sidekiq"])
                .with_auto_restart(true);
            worker.color = Some("yellow".to_string());
            defs.push(worker);
        }

        if root.join("bin").join("vite").is_file() {
            let mut assets = ProcessDefinition::new("assets", "bin/vite")
                .with_args(&["dev"])
                .with_auto_restart(true);
            assets.color = Some("cyan".to_string());
            defs.push(assets);
        }

        debug!(count = defs.len(), "rails default processes generated");
        defs
    }

    fn recommendations(&self, stats: &[QueryStatistic]) -> Vec<SmartRecommendation> {
        recommend::build(stats)
    }
}
