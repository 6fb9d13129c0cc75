//! Load and persist the project configuration file.
//!
//! Loads distinguish three failure modes: a missing file falls back to
//! defaults (not an error), a parse failure surfaces `ConfigUnparseable`,
//! and an EACCES surfaces `ConfigPermission`. Saves go through a temp file
//! in the same directory and an atomic rename, with `0600` permissions on
//! Unix so saved server lists never leak to other users.

use crate::model::RailyardConfig;
use crate::CONFIG_FILE_NAME;
use ry_common::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Handle to the configuration file of one project root.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store for the config file at the conventional location under
    /// `project_root`.
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            path: project_root.as_ref().join(CONFIG_FILE_NAME),
        }
    }

    /// Store for an explicit file path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, falling back to defaults when the file does
    /// not exist.
    pub fn load(&self) -> Result<RailyardConfig> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no config file; using defaults");
                return Ok(RailyardConfig::default());
            }
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(Error::ConfigPermission {
                    path: self.path.display().to_string(),
                });
            }
            Err(err) => return Err(Error::Io(err)),
        };

        let config: RailyardConfig =
            toml::from_str(&text).map_err(|err| Error::ConfigUnparseable(err.to_string()))?;

        for warning in config.validate() {
            warn!("config: {}", warning);
        }

        debug!(path = %self.path.display(), "configuration loaded");
        Ok(config)
    }

    /// Persist the configuration atomically with owner-only permissions.
    ///
    /// Callers treat failures as non-fatal: surface them, keep running with
    /// the in-memory config.
    pub fn save(&self, config: &RailyardConfig) -> Result<()> {
        let text =
            toml::to_string_pretty(config).map_err(|err| Error::ConfigSave(err.to_string()))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|err| Error::ConfigSave(err.to_string()))?;
        tmp.write_all(text.as_bytes())
            .map_err(|err| Error::ConfigSave(err.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tmp.as_file()
                .set_permissions(perms)
                .map_err(|err| Error::ConfigSave(err.to_string()))?;
        }

        tmp.persist(&self.path)
            .map_err(|err| Error::ConfigSave(err.to_string()))?;

        debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessConfig;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let config = store.load().unwrap();
        assert!(config.processes.is_empty());
    }

    #[test]
    fn test_unparseable_file_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        std::fs::write(store.path(), "framework = [not toml").unwrap();
        match store.load() {
            Err(Error::ConfigUnparseable(_)) => {}
            other => panic!("expected ConfigUnparseable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_round_trip_preserves_unknown_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        std::fs::write(
            store.path(),
            "framework = \"rails\"\n\n[editor]\ntheme = \"solarized\"\n",
        )
        .unwrap();

        let mut config = store.load().unwrap();
        config.processes.insert("web".to_string(), {
            let mut p = ProcessConfig::default();
            p.command = "bundle".to_string();
            p
        });
        store.save(&config).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("[editor]"));
        assert!(text.contains("solarized"));
        assert!(text.contains("[processes.web]"));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save(&RailyardConfig::default()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
