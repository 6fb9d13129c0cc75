//! Railyard common types, IDs, and errors.
//!
//! This crate provides foundational types shared across ry-core modules:
//! - Typed identifiers for requests, SSH sessions, tunnels, and exceptions
//! - The log line / parsed entry event model
//! - Process definition and status types
//! - Common error types
//! - Export format specifications

pub mod error;
pub mod export;
pub mod id;
pub mod log;
pub mod process;
pub mod ssh;

pub use error::{Error, Result};
pub use export::ExportFormat;
pub use id::{ExceptionId, Fingerprint, RequestId, SessionId, TunnelId};
pub use log::{LogLevel, LogLine, ParsedEntry, ParsedPayload};
pub use process::{ProcessDefinition, ProcessStatus};
pub use ssh::{AuthMethod, SshServer};
