//! Session log export.

use super::types::SessionLogLine;
use ry_common::export::{csv_escape, ExportFormat};

/// Render captured session output in the requested format.
pub fn render(lines: &[SessionLogLine], format: ExportFormat) -> String {
    match format {
        ExportFormat::Plain => lines
            .iter()
            .map(|line| line.content.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        ExportFormat::Csv => {
            let mut out = String::from("timestamp,content\n");
            for line in lines {
                out.push_str(&format!(
                    "{},{}\n",
                    line.at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    csv_escape(&line.content)
                ));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lines() -> Vec<SessionLogLine> {
        vec![
            SessionLogLine {
                at: Utc::now(),
                content: "uptime".to_string(),
            },
            SessionLogLine {
                at: Utc::now(),
                content: "load average: 0.42, 0.40, 0.38".to_string(),
            },
        ]
    }

    #[test]
    fn test_plain_export() {
        let text = render(&lines(), ExportFormat::Plain);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("uptime"));
    }

    #[test]
    fn test_csv_export_escapes_commas() {
        let text = render(&lines(), ExportFormat::Csv);
        assert!(text.starts_with("timestamp,content\n"));
        assert!(text.contains("\"load average: 0.42, 0.40, 0.38\""));
    }
}
