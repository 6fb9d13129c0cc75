//! EXPLAIN plan analysis and scoring.
//!
//! Plans arrive as opaque rows of text (the shape differs per backend);
//! analysis is keyword-driven: sequential/full scans, filesort, temporary
//! tables, and examined-row estimates. The performance score is
//!
//! ```text
//! 100 − 30·table_scan − 20·filesort − 15·temporary
//!     − min(35, log10(max(rows_examined, 1)) · 5)
//! ```
//!
//! clamped to [0, 100].

use super::driver::ExplainRows;
use super::types::{ExplainAnalysis, ExplainResult};
use regex::Regex;
use std::sync::LazyLock;

static ROWS_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rows[=:]\s*(\d+)").expect("rows field regex"));

/// Markers for a full table scan across the common backends.
const TABLE_SCAN_MARKERS: &[&str] = &["SEQ SCAN", "FULL SCAN", "TABLE SCAN", "TYPE: ALL"];

const INDEX_SCAN_MARKERS: &[&str] = &["INDEX SCAN", "INDEX ONLY SCAN", "USING INDEX", "REF"];

/// Analyze raw EXPLAIN rows into structure and score.
pub fn analyze(raw: &ExplainRows) -> ExplainAnalysis {
    let text: String = raw
        .rows
        .iter()
        .flat_map(|row| row.iter())
        .filter_map(|cell| cell.as_str().map(str::to_string))
        .collect::<Vec<_>>()
        .join("\n");
    let upper = text.to_uppercase();

    let has_table_scan = TABLE_SCAN_MARKERS.iter().any(|m| upper.contains(m));
    let has_index_scan = INDEX_SCAN_MARKERS.iter().any(|m| upper.contains(m));
    let using_filesort = upper.contains("FILESORT");
    let using_temporary = upper.contains("TEMPORARY");
    let rows_examined = ROWS_FIELD
        .captures_iter(&text)
        .filter_map(|caps| caps[1].parse::<u64>().ok())
        .max()
        .unwrap_or(0);

    let mut score: f64 = 100.0;
    if has_table_scan {
        score -= 30.0;
    }
    if using_filesort {
        score -= 20.0;
    }
    if using_temporary {
        score -= 15.0;
    }
    score -= ((rows_examined.max(1) as f64).log10() * 5.0).min(35.0);
    let performance_score = score.clamp(0.0, 100.0) as u8;

    let summary = if has_table_scan {
        format!(
            "Full table scan over ~{} rows{}",
            rows_examined,
            if has_index_scan { " (partially indexed)" } else { "" }
        )
    } else if has_index_scan {
        format!("Index-driven plan, ~{} rows examined", rows_examined)
    } else {
        "Plan structure not recognized; inspect the raw rows".to_string()
    };

    ExplainAnalysis {
        has_table_scan,
        has_index_scan,
        rows_examined,
        using_temporary,
        using_filesort,
        summary,
        performance_score,
    }
}

/// Actionable notes from an analysis.
pub fn recommendations(analysis: &ExplainAnalysis) -> Vec<String> {
    let mut notes = Vec::new();
    if analysis.has_table_scan {
        notes.push(
            "Sequential scan detected: add an index on the filtered column(s)".to_string(),
        );
    }
    if analysis.using_filesort {
        notes.push("Filesort detected: an index matching the ORDER BY would avoid it".to_string());
    }
    if analysis.using_temporary {
        notes.push(
            "Temporary table in use: consider simplifying GROUP BY/DISTINCT or indexing it"
                .to_string(),
        );
    }
    if analysis.rows_examined > 100_000 {
        notes.push(format!(
            "{} rows examined: tighten the predicate or paginate",
            analysis.rows_examined
        ));
    }
    notes
}

/// Assemble the host-facing result.
pub fn build_result(raw: ExplainRows) -> ExplainResult {
    let analysis = analyze(&raw);
    ExplainResult {
        recommendations: recommendations(&analysis),
        columns: raw.columns,
        rows: raw.rows,
        analysis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows_of(lines: &[&str]) -> ExplainRows {
        ExplainRows {
            columns: vec!["QUERY PLAN".to_string()],
            rows: lines.iter().map(|l| vec![json!(l)]).collect(),
        }
    }

    #[test]
    fn test_clean_index_plan_scores_high() {
        let raw = rows_of(&["Index Scan using users_pkey on users (rows=1)"]);
        let analysis = analyze(&raw);
        assert!(!analysis.has_table_scan);
        assert!(analysis.has_index_scan);
        assert_eq!(analysis.rows_examined, 1);
        assert_eq!(analysis.performance_score, 100);
    }

    #[test]
    fn test_seq_scan_penalized() {
        let raw = rows_of(&["Seq Scan on orders (rows=50000)"]);
        let analysis = analyze(&raw);
        assert!(analysis.has_table_scan);
        // 100 - 30 - log10(50000)*5 ≈ 100 - 30 - 23.5 = 46
        assert!(analysis.performance_score < 50);
        let notes = recommendations(&analysis);
        assert!(notes.iter().any(|n| n.contains("index")));
    }

    #[test]
    fn test_filesort_and_temporary_penalized() {
        let raw = rows_of(&["type: ALL; Using temporary; Using filesort; rows: 1000"]);
        let analysis = analyze(&raw);
        assert!(analysis.using_filesort);
        assert!(analysis.using_temporary);
        // 100 - 30 - 20 - 15 - 15 = 20
        assert_eq!(analysis.performance_score, 20);
    }

    #[test]
    fn test_row_penalty_capped_at_35() {
        let raw = rows_of(&["Index Scan (rows=1000000000000)"]);
        let analysis = analyze(&raw);
        assert_eq!(analysis.performance_score, 65);
    }

    #[test]
    fn test_empty_plan_is_neutral() {
        let analysis = analyze(&ExplainRows::default());
        assert_eq!(analysis.performance_score, 100);
        assert!(analysis.summary.contains("not recognized"));
    }
}
