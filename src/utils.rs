//! Utility functions for directory lookup and file output
//!
//! # Directory Structure
//!
//! - Config: `~/.config/fleetwall/` - `settings.json`
//!
//! # Example
//!
//! ```
//! use fleetwall::utils::{sha256_hex, write_atomic};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("web.hostname");
//! write_atomic(&path, b"web-01\n", 0o644).unwrap();
//! assert_eq!(std::fs::read_to_string(&path).unwrap(), "web-01\n");
//! assert_eq!(sha256_hex(b"").len(), 64);
//! ```

use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "fleetwall", "fleetwall").map(|pd| pd.config_dir().to_path_buf())
}

/// Writes `contents` to `path` through a temp file in the same directory.
///
/// The temp file gets `mode` on Unix before any data is written, then is
/// renamed over `path`. Readers see either the old file or the new one.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::Builder::new()
        .prefix(".fleetwall-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    file.write_all(contents)?;
    file.as_file().sync_all()?; // Flush before the rename makes it visible

    file.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                format!("Disk full: cannot write {}", path.display()),
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// `<path>.sha256`, next to `path`
pub fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Writes `contents` atomically along with a `.sha256` sidecar
pub fn write_with_checksum(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    write_atomic(path, contents, mode)?;
    write_atomic(&checksum_path(path), sha256_hex(contents).as_bytes(), mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_checksum_path_appends_extension() {
        assert_eq!(
            checksum_path(Path::new("build/firewall/web.iptables")),
            PathBuf::from("build/firewall/web.iptables.sha256")
        );
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"first", 0o600).unwrap();
        write_atomic(&path, b"second", 0o600).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        write_atomic(&path, b"#!/bin/bash\n", 0o755).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_write_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.iptables");
        write_with_checksum(&path, b"COMMIT\n", 0o644).unwrap();
        assert_eq!(
            std::fs::read_to_string(checksum_path(&path)).unwrap(),
            sha256_hex(b"COMMIT\n")
        );
    }
}
