//! Railyard core engine.
//!
//! The backend of a developer-workstation observability and control plane
//! for Rails/web applications. Four subsystems carry the weight:
//!
//! - [`supervisor`] — spawns, monitors, restarts, and multiplexes I/O with
//!   long-running child processes over pseudo-terminals ([`pty`])
//! - [`logs`] — captures and attributes output lines, classifies them, and
//!   fans them out to bounded subscribers
//! - [`query`] — fingerprints SQL, groups it by request, detects N+1
//!   patterns, and produces recommendations (fed by [`db`])
//! - [`ssh`] — a pool of authenticated SSH sessions with PTY streams,
//!   keepalive health sampling, and tunnels
//!
//! [`plugin`] glues the pipeline to framework specifics ([`rails`] is the
//! reference plugin); [`security`] gates everything that touches the
//! operating system; [`workers`] offloads expensive synchronous jobs;
//! [`workbench`] wires the subsystems into the host-facing surface.

pub mod db;
pub mod exceptions;
pub mod exit_codes;
pub mod logs;
pub mod metrics;
pub mod plugin;
pub mod pty;
pub mod query;
pub mod rails;
pub mod security;
pub mod ssh;
pub mod supervisor;
pub mod workbench;
pub mod workers;

pub use exit_codes::ExitCode;
pub use workbench::{Workbench, WorkbenchEvent};
