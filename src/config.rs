use crate::core::error::Result;
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Build output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Root of all generated artifacts
    #[serde(default = "default_build_path")]
    pub build_path: PathBuf,
    /// Wipe `<build-path>/hostname` before building
    #[serde(default)]
    pub build_remove_folder_hostname: bool,
    #[serde(default)]
    pub build_remove_folder_hosts: bool,
    #[serde(default)]
    pub build_remove_folder_ssh: bool,
    #[serde(default)]
    pub build_remove_folder_firewall: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_path: default_build_path(),
            build_remove_folder_hostname: false,
            build_remove_folder_hosts: false,
            build_remove_folder_ssh: false,
            build_remove_folder_firewall: false,
        }
    }
}

fn default_build_path() -> PathBuf {
    PathBuf::from("build")
}

impl Settings {
    /// Settings rooted at `build_path` with nothing removed
    pub fn with_build_path(build_path: impl Into<PathBuf>) -> Self {
        Self {
            build_path: build_path.into(),
            ..Self::default()
        }
    }
}

/// Default settings file: `settings.json` in the XDG config dir
pub fn default_settings_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("settings.json"))
}

/// Loads settings from `explicit`, else the default settings file, else defaults.
///
/// A missing file falls through to the defaults. A file that exists but
/// doesn't parse is an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_settings_path(),
    };

    if let Some(path) = path
        && let Some(settings) = read_settings(&path)?
    {
        debug!(path = %path.display(), "Loaded settings");
        return Ok(settings);
    }
    Ok(Settings::default())
}

fn read_settings(path: &Path) -> Result<Option<Settings>> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.build_path, PathBuf::from("build"));
        assert!(!settings.build_remove_folder_firewall);
    }

    #[test]
    fn test_kebab_case_keys() {
        let settings: Settings = serde_json::from_str(
            r#"{ "build-path": "/tmp/out", "build-remove-folder-ssh": true }"#,
        )
        .unwrap();
        assert_eq!(settings.build_path, PathBuf::from("/tmp/out"));
        assert!(settings.build_remove_folder_ssh);
        assert!(!settings.build_remove_folder_hosts);
    }

    #[test]
    fn test_explicit_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(Some(&dir.path().join("missing.json"))).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_explicit_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "build-path": "out" }"#).unwrap();
        assert_eq!(
            load_settings(Some(&path)).unwrap(),
            Settings::with_build_path("out")
        );
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(
            load_settings(Some(&path)).unwrap_err().kind(),
            ErrorKind::Serialization
        );
    }
}
