//! Identity types for requests, SSH sessions, tunnels, and exceptions.
//!
//! These are string slugs with generated forms; wrapping them in newtypes
//! keeps the many id-keyed maps in ry-core from mixing keys up.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

fn short_random() -> String {
    uuid::Uuid::new_v4().to_string().chars().take(6).collect()
}

/// Correlation id minted when a request's `Started` log line is observed.
///
/// Format: `req-<random>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a fresh request id.
    pub fn new() -> Self {
        RequestId(format!("req-{}", short_random()))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SSH session id.
///
/// Format: `ssh-<date>-<time>-<random>`
/// Example: `ssh-20260115-143022-abc123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new session id.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        SessionId(format!(
            "ssh-{}-{}",
            now.format("%Y%m%d-%H%M%S"),
            short_random()
        ))
    }

    /// Parse an existing session id string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("ssh-") && s.len() > 20 {
            Some(SessionId(s.to_string()))
        } else {
            None
        }
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunnel id, unique within its parent session.
///
/// Format: `tun-<random>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(pub String);

impl TunnelId {
    pub fn new() -> Self {
        TunnelId(format!("tun-{}", short_random()))
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exception record id.
///
/// Format: `exc-<random>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionId(pub String);

impl ExceptionId {
    pub fn new() -> Self {
        ExceptionId(format!("exc-{}", short_random()))
    }
}

impl Default for ExceptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExceptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonicalized SQL shape, stable under parameter substitution and
/// cosmetic differences. Used as the key for query statistics.
///
/// The inner string is the canonical text itself, not a hash, so that
/// recommendations can show the shape back to the user. `digest()` gives a
/// short stable token for compact display and cross-referencing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Short stable digest of the canonical form (first 12 hex chars of
    /// SHA-256).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let id = SessionId::new();
        assert!(id.0.starts_with("ssh-"));
        assert!(SessionId::parse(&id.0).is_some());
    }

    #[test]
    fn test_session_id_parse_rejects_garbage() {
        assert!(SessionId::parse("not-a-session").is_none());
        assert!(SessionId::parse("ssh-short").is_none());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_digest_is_stable() {
        let fp = Fingerprint("SELECT * FROM users WHERE id = ?".to_string());
        assert_eq!(fp.digest(), fp.digest());
        assert_eq!(fp.digest().len(), 12);
    }

    #[test]
    fn test_fingerprint_digest_differs_by_shape() {
        let a = Fingerprint("SELECT * FROM users WHERE id = ?".to_string());
        let b = Fingerprint("SELECT name FROM users WHERE id = ?".to_string());
        assert_ne!(a.digest(), b.digest());
    }
}
