//! `.env` file ingestion.
//!
//! `KEY=VALUE` pairs merged into every spawned process environment.
//! Supports `export ` prefixes, comments, and single/double quoted values.
//! Interpolation is deliberately not supported.

use std::collections::HashMap;
use std::path::Path;

/// Load a `.env` file. A missing file yields an empty map.
pub fn load_env(path: impl AsRef<Path>) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_env(&content),
        Err(_) => HashMap::new(),
    }
}

/// Parse `.env` text into a map.
pub fn parse_env(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let value = unquote(value.trim());
        vars.insert(key.to_string(), value);
    }
    vars
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}
