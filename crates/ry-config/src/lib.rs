//! Railyard project configuration loading and persistence.
//!
//! This crate provides:
//! - Typed Rust structs for the `.railyard.toml` project file
//! - Atomic save with owner-only (0600) permissions
//! - Unknown-section preservation across load/save round-trips
//! - Procfile and `.env` ingestion
//! - Semantic validation with non-fatal warnings

pub mod envfile;
pub mod model;
pub mod procfile;
pub mod store;

pub use envfile::load_env;
pub use model::{
    DatabaseSection, ProcessConfig, RailyardConfig, SavedConnection, SavedQuery, SshSection,
};
pub use procfile::Procfile;
pub use store::ConfigStore;

/// Name of the project configuration file, looked up at the project root.
pub const CONFIG_FILE_NAME: &str = ".railyard.toml";

/// Schema version for the configuration file.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
