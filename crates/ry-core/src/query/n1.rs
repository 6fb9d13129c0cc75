//! N+1 access-pattern detection, run per request at group-close time.
//!
//! The gate is deliberately conservative to avoid flagging legitimate batch
//! loops: a fingerprint must repeat at least five times inside one request,
//! target a single table, and have a point-lookup shape (primary-key
//! equality or single-column selector, no joins).

use super::types::{N1Warning, RequestQueryGroup};
use regex::Regex;
use ry_common::Fingerprint;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Minimum repetitions of one shape within a request before it is a
/// candidate.
pub const N1_MIN_COUNT: u64 = 5;

/// Point-lookup tail: a single `= ?` or `IN ( ? )` condition, optionally
/// followed by ORDER BY / LIMIT.
static POINT_LOOKUP_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:= \?|IN \( \? \))(?: ORDER BY [^?]+?)?(?: LIMIT \?)?$"#)
        .expect("point lookup regex")
});

/// Whether a canonical shape is a single-table point lookup.
pub fn is_point_lookup(fingerprint: &Fingerprint) -> bool {
    let shape = &fingerprint.0;
    shape.starts_with("SELECT")
        && shape.contains(" WHERE ")
        && !shape.contains(" JOIN ")
        && !shape.contains(" AND ")
        && !shape.contains(" OR ")
        && POINT_LOOKUP_TAIL.is_match(shape)
}

/// Confidence that a repeated point lookup is a real N+1, 0-100.
pub fn confidence(count: u64) -> u8 {
    (50 + 5 * count.saturating_sub(N1_MIN_COUNT)).min(100) as u8
}

/// Detect N+1 patterns in a closed group. `ignored` suppresses
/// fingerprints the user has dismissed.
pub fn detect(group: &RequestQueryGroup, ignored: &HashSet<Fingerprint>) -> Vec<N1Warning> {
    struct Candidate<'a> {
        count: u64,
        total_ms: f64,
        tables: HashSet<&'a str>,
        examples: Vec<&'a str>,
    }

    let mut by_shape: HashMap<&Fingerprint, Candidate<'_>> = HashMap::new();
    for query in &group.queries {
        let entry = by_shape.entry(&query.fingerprint).or_insert(Candidate {
            count: 0,
            total_ms: 0.0,
            tables: HashSet::new(),
            examples: Vec::new(),
        });
        entry.count += 1;
        entry.total_ms += query.duration_ms;
        if let Some(ref table) = query.table {
            entry.tables.insert(table.as_str());
        }
        if entry.examples.len() < 3 {
            entry.examples.push(query.sql.as_str());
        }
    }

    let mut warnings: Vec<N1Warning> = by_shape
        .into_iter()
        .filter(|(fp, candidate)| {
            candidate.count >= N1_MIN_COUNT
                && candidate.tables.len() == 1
                && is_point_lookup(fp)
                && !ignored.contains(*fp)
        })
        .map(|(fp, candidate)| {
            let table = candidate
                .tables
                .iter()
                .next()
                .map(|t| t.to_string())
                .unwrap_or_default();
            N1Warning {
                fingerprint: fp.clone(),
                suggestion: format!(
                    "Use eager loading (e.g. includes(:{})) to replace {} point lookups with one query",
                    table, candidate.count
                ),
                table,
                count: candidate.count,
                total_duration_ms: candidate.total_ms,
                confidence: confidence(candidate.count),
                examples: candidate.examples.iter().map(|s| s.to_string()).collect(),
            }
        })
        .collect();

    warnings.sort_by(|a, b| b.count.cmp(&a.count));
    warnings
}
