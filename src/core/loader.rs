//! Topology file loading and saving
//!
//! Topologies are plain JSON. Saving also writes a `<file>.sha256` sidecar;
//! loading compares against it when present and warns on mismatch, since
//! hand-edited topologies are normal.

use crate::core::error::Result;
use crate::core::topology::Firewall;
use crate::utils::{checksum_path, sha256_hex, write_with_checksum};
use std::path::Path;
use tracing::{debug, warn};

/// Reads a topology file.
///
/// # Errors
///
/// [`crate::Error::Io`] if the file can't be read, [`crate::Error::Serialization`]
/// if it isn't a valid topology.
pub fn load_firewall(path: &Path) -> Result<Firewall> {
    let json = std::fs::read_to_string(path)?;

    // Verify checksum if present (warns but doesn't fail for edited topologies)
    if let Ok(expected) = std::fs::read_to_string(checksum_path(path)) {
        let actual = sha256_hex(json.as_bytes());
        if expected.trim() != actual {
            warn!(
                "Topology '{}' checksum mismatch (expected: {}, got: {})",
                path.display(),
                expected.trim(),
                actual
            );
        }
    }

    let firewall: Firewall = serde_json::from_str(&json)?;
    debug!(
        path = %path.display(),
        servers = firewall.servers.len(),
        "Loaded topology"
    );
    Ok(firewall)
}

/// Writes a topology as pretty JSON, atomically, with a checksum sidecar.
///
/// # Errors
///
/// Serialization or I/O failure.
pub fn save_firewall(path: &Path, firewall: &Firewall) -> Result<()> {
    let mut json = serde_json::to_string_pretty(firewall)?;
    json.push('\n');
    write_with_checksum(path, json.as_bytes(), 0o600)?;
    Ok(())
}
