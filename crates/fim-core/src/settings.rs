use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::resolve_under;

pub const DEFAULT_CONTENT: &str = "My Super Secret Data";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read settings {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Monitor configuration. Relative paths are anchored under the data
/// directory by [`MonitorSettings::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub target_path: PathBuf,
    pub log_path: PathBuf,
    pub backup_dir: PathBuf,
    pub snapshot_prefix: String,
    pub poll_interval_secs: u64,
    pub keep_backups: usize,
    pub self_heal: bool,
    pub heal_delay_ms: u64,
    pub initial_content: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            target_path: PathBuf::from("secret.txt"),
            log_path: PathBuf::from("security_log.txt"),
            backup_dir: PathBuf::from("backups"),
            snapshot_prefix: "secret".into(),
            poll_interval_secs: 2,
            keep_backups: 3,
            self_heal: true,
            heal_delay_ms: 1500,
            initial_content: DEFAULT_CONTENT.into(),
        }
    }
}

impl MonitorSettings {
    /// Read settings from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        // Snapshot names have one-second resolution.
        if self.poll_interval_secs < 1 {
            return Err(SettingsError::Invalid(
                "poll interval must be at least 1 second".into(),
            ));
        }
        if self.keep_backups < 1 {
            return Err(SettingsError::Invalid(
                "at least one backup must be retained".into(),
            ));
        }
        if self.snapshot_prefix.is_empty()
            || self.snapshot_prefix.starts_with('.')
            || self.snapshot_prefix.contains(|c: char| c == '/' || c == '\\')
        {
            return Err(SettingsError::Invalid(format!(
                "snapshot prefix {:?} must be a plain file name",
                self.snapshot_prefix
            )));
        }
        if self.target_path.as_os_str().is_empty() {
            return Err(SettingsError::Invalid("target path is empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heal_delay(&self) -> Duration {
        Duration::from_millis(self.heal_delay_ms)
    }

    /// Anchor every relative path under `base`.
    pub fn resolve(mut self, base: &Path) -> Self {
        self.target_path = resolve_under(base, &self.target_path);
        self.log_path = resolve_under(base, &self.log_path);
        self.backup_dir = resolve_under(base, &self.backup_dir);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let s = MonitorSettings::default();
        s.validate().unwrap();
        assert_eq!(s.poll_interval(), Duration::from_secs(2));
        assert_eq!(s.heal_delay(), Duration::from_millis(1500));
        assert_eq!(s.keep_backups, 3);
        assert!(s.self_heal);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fim.json");
        fs::write(&path, r#"{ "poll_interval_secs": 5, "self_heal": false }"#).unwrap();
        let s = MonitorSettings::load(&path).unwrap();
        assert_eq!(s.poll_interval_secs, 5);
        assert!(!s.self_heal);
        assert_eq!(s.snapshot_prefix, "secret");
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fim.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MonitorSettings::load(&path),
            Err(SettingsError::Parse { .. })
        ));
        assert!(matches!(
            MonitorSettings::load(&dir.path().join("absent.json")),
            Err(SettingsError::Read { .. })
        ));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut s = MonitorSettings::default();
        s.poll_interval_secs = 0;
        assert!(s.validate().is_err());

        let mut s = MonitorSettings::default();
        s.keep_backups = 0;
        assert!(s.validate().is_err());

        let mut s = MonitorSettings::default();
        s.snapshot_prefix = "../escape".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn resolve_anchors_relative_paths() {
        let base = Path::new("/data");
        let s = MonitorSettings::default().resolve(base);
        assert_eq!(s.target_path, base.join("secret.txt"));
        assert_eq!(s.backup_dir, base.join("backups"));
        assert_eq!(s.log_path, base.join("security_log.txt"));
    }
}
