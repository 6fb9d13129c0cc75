//! Export format specifications for session and log dumps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Formats a session or log export can be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// One line per entry, as captured.
    Plain,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "plain" | "txt" | "text" => Ok(ExportFormat::Plain),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Plain => write!(f, "plain"),
        }
    }
}

/// Escape a field for CSV output: quote when it contains a comma, quote, or
/// newline, doubling embedded quotes.
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
