//! Security gates wrapping supervisor and database ingress.
//!
//! Four independent checks, all cheap and synchronous:
//!
//! - **Command allowlist**: the command token of a newly registered process
//!   must appear in the configured allowlist; wildcard paths are rejected.
//! - **Argument validation**: rejects shell-metacharacter sequences that
//!   would enable injection in a shell-invoked context. The supervisor
//!   spawns without a shell, so this is defense in depth.
//! - **Path confinement**: a working directory must resolve, after symlink
//!   expansion, to a path under an allowlisted root.
//! - **Rate limiting**: token bucket per category (`process`, `query`,
//!   `pty`).
//!
//! Outbound message scrubbing lives in the `ry-redact` crate.

mod gates;
mod rate_limit;

pub use gates::{CommandGate, PathGate};
pub use rate_limit::{RateCategory, RateLimiter, RateLimiterConfig};
