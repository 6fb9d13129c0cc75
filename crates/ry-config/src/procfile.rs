//! Procfile parsing.
//!
//! A Procfile declares WHAT to run, one `name: command` per line. Commands
//! are split on whitespace for shell-less spawning; quoting is not
//! supported (the original format never supported it either — use
//! `[processes.<name>]` in `.railyard.toml` for anything fancier).

use ry_common::ProcessDefinition;
use std::collections::HashMap;
use std::path::Path;

/// Parsed Procfile contents, entry order preserved.
#[derive(Debug, Clone, Default)]
pub struct Procfile {
    pub entries: Vec<ProcfileEntry>,
}

/// One `name: command` line.
#[derive(Debug, Clone)]
pub struct ProcfileEntry {
    pub name: String,
    pub command: String,
}

impl Procfile {
    /// Parse a Procfile on disk.
    pub fn parse(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse_content(&content))
    }

    /// Parse Procfile text. Blank lines, comments, and lines without a
    /// colon are skipped; duplicate names keep the first occurrence.
    pub fn parse_content(content: &str) -> Self {
        let mut entries: Vec<ProcfileEntry> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, command)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            let command = command.trim();
            if name.is_empty() || command.is_empty() {
                continue;
            }
            if entries.iter().any(|e| e.name == name) {
                continue;
            }
            entries.push(ProcfileEntry {
                name: name.to_string(),
                command: command.to_string(),
            });
        }
        Self { entries }
    }

    /// Convert entries into supervisor definitions, merging `base_env` into
    /// each process environment.
    pub fn to_definitions(&self, base_env: &HashMap<String, String>) -> Vec<ProcessDefinition> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let mut tokens = entry.command.split_whitespace();
                let command = tokens.next()?.to_string();
                let args: Vec<String> = tokens.map(|s| s.to_string()).collect();
                let mut def = ProcessDefinition::new(&entry.name, command);
                def.args = args;
                def.env = base_env.clone();
                def.auto_restart = true;
                Some(def)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_procfile() {
        let procfile = Procfile::parse_content(
            "web: bundle exec rails server -p 3000\nworker: bundle exec sidekiq\n",
        );
        assert_eq!(procfile.entries.len(), 2);
        assert_eq!(procfile.entries[0].name, "web");
        assert_eq!(procfile.entries[1].command, "bundle exec sidekiq");
    }

    #[test]
    fn test_skips_comments_blanks_and_malformed() {
        let procfile = Procfile::parse_content("# comment\n\nnot a process line\nweb: rails s\n");
        assert_eq!(procfile.entries.len(), 1);
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let procfile = Procfile::parse_content("web: rails s\nweb: puma\n");
        assert_eq!(procfile.entries.len(), 1);
        assert_eq!(procfile.entries[0].command, "rails s");
    }

    #[test]
    fn test_to_definitions_splits_command() {
        let procfile = Procfile::parse_content("web: bundle exec rails server -p 3000\n");
        let defs = procfile.to_definitions(&HashMap::new());
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].command, "bundle");
        assert_eq!(defs[0].args, vec!["exec", "rails", "server", "-p", "3000"]);
        assert!(defs[0].auto_restart);
    }
}
