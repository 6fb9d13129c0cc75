//! Error types for Railyard.

use thiserror::Error;

/// Result type alias for Railyard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Railyard.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration file is unparseable: {0}")]
    ConfigUnparseable(String),

    #[error("permission denied accessing configuration at {path}")]
    ConfigPermission { path: String },

    #[error("configuration save failed: {0}")]
    ConfigSave(String),

    // Process supervision errors (20-29)
    #[error("unknown process: {name}")]
    UnknownProcess { name: String },

    #[error("process {name} is already running")]
    AlreadyRunning { name: String },

    #[error("process {name} is not running")]
    NotRunning { name: String },

    #[error("failed to spawn process {name}: {cause}")]
    SpawnFailed { name: String, cause: String },

    #[error("pseudo-terminal allocation failed: {0}")]
    PtyAllocFailed(String),

    #[error("pty handle is already closed")]
    AlreadyClosed,

    #[error("a process named {name} is already registered")]
    DuplicateProcess { name: String },

    // Security gate errors (30-39)
    #[error("command not in allowlist: {command}")]
    CommandNotAllowed { command: String },

    #[error("argument rejected by sanitizer: {argument}")]
    UnsafeArgument { argument: String },

    #[error("working directory escapes allowed roots: {path}")]
    PathNotAllowed { path: String },

    #[error("rate limit exceeded for {category}")]
    RateLimited { category: String },

    // Database errors (40-49)
    #[error("database is not connected")]
    NotConnected,

    #[error("destructive statement requires confirmation: {statement}")]
    ConfirmationRequired { statement: String },

    #[error("query execution failed: {0}")]
    ExecutionFailed(String),

    #[error("explain failed: {0}")]
    ExplainFailed(String),

    // SSH errors (50-59)
    #[error("unknown session: {id}")]
    UnknownSession { id: String },

    #[error("session limit reached ({max} concurrent sessions)")]
    SessionLimitReached { max: usize },

    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("host key changed for {host}; refusing to connect")]
    HostKeyChanged { host: String },

    #[error("connection to {host} failed: {cause}")]
    ConnectionFailed { host: String, cause: String },

    #[error("tunnel setup failed: {0}")]
    TunnelFailed(String),

    // Worker pool errors (60-69)
    #[error("worker pool is closed")]
    WorkerPoolClosed,

    // I/O errors (70-79)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting at the host boundary.
    pub fn code(&self) -> u32 {
        match self {
            Error::ConfigUnparseable(_) => 10,
            Error::ConfigPermission { .. } => 11,
            Error::ConfigSave(_) => 12,
            Error::UnknownProcess { .. } => 20,
            Error::AlreadyRunning { .. } => 21,
            Error::NotRunning { .. } => 22,
            Error::SpawnFailed { .. } => 23,
            Error::PtyAllocFailed(_) => 24,
            Error::AlreadyClosed => 25,
            Error::DuplicateProcess { .. } => 26,
            Error::CommandNotAllowed { .. } => 30,
            Error::UnsafeArgument { .. } => 31,
            Error::PathNotAllowed { .. } => 32,
            Error::RateLimited { .. } => 33,
            Error::NotConnected => 40,
            Error::ConfirmationRequired { .. } => 41,
            Error::ExecutionFailed(_) => 42,
            Error::ExplainFailed(_) => 43,
            Error::UnknownSession { .. } => 50,
            Error::SessionLimitReached { .. } => 51,
            Error::AuthenticationFailed { .. } => 52,
            Error::HostKeyChanged { .. } => 53,
            Error::ConnectionFailed { .. } => 54,
            Error::TunnelFailed(_) => 55,
            Error::WorkerPoolClosed => 60,
            Error::Io(_) => 70,
            Error::Json(_) => 71,
        }
    }

    /// Whether a caller may safely retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::ConnectionFailed { .. }
        )
    }
}
