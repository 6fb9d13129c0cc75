//! Exit codes for the railyard binary.
//!
//! Exit codes communicate boot outcome without requiring output parsing.

/// Exit codes for railyard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean shutdown
    Clean = 0,

    /// Unhandled failure
    Failure = 1,

    /// Configuration file present but unparseable
    ConfigError = 2,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }
}
