//! SQL fingerprinting: reduce a statement to its canonical shape.
//!
//! The canonical form is stable under parameter rebinding and cosmetic
//! differences: keywords and identifiers are case-normalized, literals
//! become `?`, `IN (...)` lists collapse, whitespace is normalized,
//! comments and trailing semicolons are dropped. Fingerprinting is
//! idempotent: running it on its own output is a no-op.

use regex::Regex;
use ry_common::Fingerprint;
use std::sync::LazyLock;

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("line comment regex"));

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment regex"));

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").expect("string literal regex"));

static HEX_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0[xX][0-9a-fA-F]+\b").expect("hex literal regex"));

static NUMBER_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("number literal regex"));

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([=<>!,()])").expect("punctuation regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static IN_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IN \( \?(?: , \?)* \)").expect("in list regex"));

static FROM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|INTO|UPDATE)\s+[`"]?([A-Za-z_][A-Za-z0-9_]*)[`"]?"#)
        .expect("from table regex")
});

static LEADING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*([A-Za-z]+)").expect("leading keyword regex"));

/// Compute the canonical fingerprint of a statement.
pub fn fingerprint(sql: &str) -> Fingerprint {
    let mut text = LINE_COMMENT.replace_all(sql, " ").into_owned();
    text = BLOCK_COMMENT.replace_all(&text, " ").into_owned();
    text = STRING_LITERAL.replace_all(&text, "?").into_owned();
    text = text.to_uppercase();
    text = HEX_LITERAL.replace_all(&text, "?").into_owned();
    text = NUMBER_LITERAL.replace_all(&text, "?").into_owned();
    text = PUNCTUATION.replace_all(&text, " $1 ").into_owned();
    text = WHITESPACE.replace_all(&text, " ").into_owned();
    let mut text = text.trim().to_string();
    while text.ends_with(';') {
        text.pop();
        text = text.trim_end().to_string();
    }
    text = IN_LIST.replace_all(&text, "IN ( ? )").into_owned();
    Fingerprint(text)
}

/// Extract the primary table a statement targets, preserving source case.
pub fn extract_table(sql: &str) -> Option<String> {
    FROM_TABLE
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Statement verb (`SELECT`, `INSERT`, ...), uppercased.
pub fn extract_operation(sql: &str) -> Option<String> {
    let keyword = LEADING_KEYWORD.captures(sql)?.get(1)?.as_str().to_uppercase();
    match keyword.as_str() {
        "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "CREATE" | "DROP" | "ALTER" | "TRUNCATE"
        | "BEGIN" | "COMMIT" | "ROLLBACK" | "EXPLAIN" | "WITH" => Some(keyword),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cosmetic_differences_collapse() {
        let a = fingerprint("SELECT * FROM users WHERE id=1");
        let b = fingerprint("select   *  From  Users  Where  id  =  42");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_projection_differs() {
        let a = fingerprint("SELECT * FROM users WHERE id=1");
        let b = fingerprint("SELECT name FROM users WHERE id=1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_literals_replaced() {
        let a = fingerprint("SELECT * FROM users WHERE email = 'a@x.com'");
        let b = fingerprint("SELECT * FROM users WHERE email = 'b@y.org'");
        assert_eq!(a, b);
        assert!(!a.0.contains("a@x.com"));
    }

    #[test]
    fn test_in_lists_collapse() {
        let a = fingerprint("SELECT * FROM users WHERE id IN (1, 2, 3)");
        let b = fingerprint("SELECT * FROM users WHERE id IN (4)");
        assert_eq!(a, b);
    }

    #[test]
    fn test_comments_and_semicolons_dropped() {
        let a = fingerprint("SELECT * FROM users; -- load them all");
        let b = fingerprint("/* cached */ SELECT * FROM users");
        assert_eq!(a, b);
    }

    #[test]
    fn test_quoted_identifiers_normalize() {
        let a = fingerprint(r#"SELECT "users".* FROM "users" WHERE "users"."id" = $1"#);
        let b = fingerprint(r#"SELECT "users".* FROM "users" WHERE "users"."id" = $2"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_idempotent() {
        let once = fingerprint("SELECT * FROM orders WHERE total > 99.50");
        let twice = fingerprint(&once.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_extract_table() {
        assert_eq!(
            extract_table(r#"SELECT "users".* FROM "users" WHERE id = 1"#).as_deref(),
            Some("users")
        );
        assert_eq!(
            extract_table("INSERT INTO orders (id) VALUES (1)").as_deref(),
            Some("orders")
        );
        assert_eq!(extract_table("UPDATE carts SET total = 0").as_deref(), Some("carts"));
        assert_eq!(extract_table("BEGIN"), None);
    }

    #[test]
    fn test_extract_operation() {
        assert_eq!(extract_operation("select 1").as_deref(), Some("SELECT"));
        assert_eq!(
            extract_operation("  DELETE FROM orders").as_deref(),
            Some("DELETE")
        );
        assert_eq!(extract_operation("VACUUM"), None);
    }

    proptest! {
        // Idempotency holds for arbitrary statement-shaped input.
        #[test]
        fn prop_fingerprint_idempotent(sql in "[a-zA-Z0-9_*.,=<>()' ]{0,120}") {
            let once = fingerprint(&sql);
            let twice = fingerprint(&once.0);
            prop_assert_eq!(once, twice);
        }

        // Rebinding an integer parameter never changes the shape.
        #[test]
        fn prop_parameter_invariance(id in 0u64..1_000_000) {
            let a = fingerprint(&format!("SELECT * FROM users WHERE id = {}", id));
            let b = fingerprint("SELECT * FROM users WHERE id = 1");
            prop_assert_eq!(a, b);
        }
    }
}
