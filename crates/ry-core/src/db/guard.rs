//! Destructive-statement classification.
//!
//! The plain `execute` path refuses anything that can destroy data:
//! `DROP`, `TRUNCATE`, and `ALTER` unconditionally, and `UPDATE`/`DELETE`
//! when no `WHERE` clause bounds them. Only the distinct confirmed path
//! runs such statements, and only with the confirmation flag actually set.

/// Why a statement was classified destructive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementClass {
    Safe,
    Destructive { reason: String },
}

/// Classify a statement before execution.
pub fn classify(sql: &str) -> StatementClass {
    let normalized = sql.trim().to_uppercase();
    let head = normalized.split_whitespace().next().unwrap_or("");

    match head {
        "DROP" | "TRUNCATE" | "ALTER" => StatementClass::Destructive {
            reason: format!("{} is always gated", head),
        },
        "UPDATE" | "DELETE" => {
            if has_top_level_where(&normalized) {
                StatementClass::Safe
            } else {
                StatementClass::Destructive {
                    reason: format!("{} without WHERE affects every row", head),
                }
            }
        }
        _ => StatementClass::Safe,
    }
}

/// Whether the (already uppercased) statement has a WHERE outside string
/// literals and outside any parenthesized sub-expression. A WHERE inside
/// a sub-select bounds only the sub-select, never the outer statement.
fn has_top_level_where(normalized: &str) -> bool {
    let bytes = normalized.as_bytes();
    let needle = b"WHERE";
    let mut in_string = false;
    let mut depth: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        if in_string {
            i += 1;
            continue;
        }
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && bytes[i..].starts_with(needle) {
            let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
            let after = i + needle.len();
            let after_ok = after >= bytes.len() || !is_word_byte(bytes[after]);
            if before_ok && after_ok {
                return true;
            }
        }
        i += 1;
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
