//! Build orchestration
//!
//! A build validates the fleet, prepares the output tree, compiles every
//! requested server in memory and only then writes files. Compilation runs in
//! parallel on the rayon pool; writes run in ascending server-name order and
//! stop at the first server that failed. Files written for earlier servers are
//! kept.
//!
//! ```text
//! <build-path>/
//!   firewall/<server>.iptables (+ .sha256)
//!   hostname/<server>.hostname
//!   hosts/<server>.hosts
//!   ssh/<server>-<service>.sh
//! ```

use crate::artifacts::{
    Artifact, ArtifactKind, Artifacts, compile_artifacts, firewall_file_name,
};
use crate::config::Settings;
use crate::core::error::{Error, Result};
use crate::core::topology::Firewall;
use crate::core::validate::validate_structure;
use crate::utils::{write_atomic, write_with_checksum};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;
use tracing::{debug, info};

/// Output directories derived from [`Settings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub firewall: PathBuf,
    pub hostname: PathBuf,
    pub hosts: PathBuf,
    pub ssh: PathBuf,
    remove: Vec<ArtifactKind>,
}

impl OutputPaths {
    pub fn new(settings: &Settings) -> Self {
        let root = &settings.build_path;
        let remove = [
            (ArtifactKind::Firewall, settings.build_remove_folder_firewall),
            (ArtifactKind::Hostname, settings.build_remove_folder_hostname),
            (ArtifactKind::Hosts, settings.build_remove_folder_hosts),
            (ArtifactKind::Ssh, settings.build_remove_folder_ssh),
        ]
        .into_iter()
        .filter_map(|(kind, flag)| flag.then_some(kind))
        .collect();

        Self {
            firewall: root.join(ArtifactKind::Firewall.as_ref()),
            hostname: root.join(ArtifactKind::Hostname.as_ref()),
            hosts: root.join(ArtifactKind::Hosts.as_ref()),
            ssh: root.join(ArtifactKind::Ssh.as_ref()),
            remove,
        }
    }

    pub fn dir(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Firewall => &self.firewall,
            ArtifactKind::Hostname => &self.hostname,
            ArtifactKind::Hosts => &self.hosts,
            ArtifactKind::Ssh => &self.ssh,
        }
    }

    /// Removes directories flagged for removal, then creates all four.
    pub fn prepare(&self) -> Result<()> {
        for &kind in &self.remove {
            let dir = self.dir(kind);
            match std::fs::remove_dir_all(dir) {
                Ok(()) => debug!(dir = %dir.display(), "Removed output directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        for kind in ArtifactKind::iter() {
            std::fs::create_dir_all(self.dir(kind))?;
        }
        Ok(())
    }

    pub fn path_of(&self, artifact: &Artifact) -> PathBuf {
        self.dir(artifact.kind).join(&artifact.file_name)
    }
}

/// What a successful build wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Servers built, in the order they were written
    pub servers: Vec<String>,
    pub files: Vec<PathBuf>,
}

fn write_artifacts(paths: &OutputPaths, artifacts: &Artifacts, report: &mut BuildReport) -> Result<()> {
    for artifact in &artifacts.files {
        let path = paths.path_of(artifact);
        let bytes = artifact.contents.as_bytes();
        if artifact.kind == ArtifactKind::Firewall {
            write_with_checksum(&path, bytes, artifact.kind.mode())?;
        } else {
            write_atomic(&path, bytes, artifact.kind.mode())?;
        }
        report.files.push(path);
    }
    report.servers.push(artifacts.server.clone());
    info!(
        server = %artifacts.server,
        files = artifacts.files.len(),
        "Built server"
    );
    Ok(())
}

/// Builds every server in the fleet.
///
/// # Errors
///
/// The first structural error, or the error of the first server (by name)
/// that failed to compile or write. Servers before it are already on disk.
pub fn build_all(firewall: &Firewall, settings: &Settings) -> Result<BuildReport> {
    validate_structure(firewall)?;

    let paths = OutputPaths::new(settings);
    paths.prepare()?;

    let names: Vec<&str> = firewall.servers.keys().map(String::as_str).collect();
    let compiled: Vec<Result<Artifacts>> = names
        .par_iter()
        .map(|name| compile_artifacts(firewall, name))
        .collect();

    let mut report = BuildReport::default();
    for artifacts in compiled {
        write_artifacts(&paths, &artifacts?, &mut report)?;
    }

    info!(servers = report.servers.len(), "Build complete");
    Ok(report)
}

/// Builds a single server.
///
/// # Errors
///
/// [`Error::ServerNotFound`] for an unknown name, otherwise as [`build_all`].
pub fn build_server(firewall: &Firewall, settings: &Settings, name: &str) -> Result<BuildReport> {
    if !firewall.servers.contains_key(name) {
        return Err(Error::ServerNotFound(name.to_string()));
    }
    validate_structure(firewall)?;

    let paths = OutputPaths::new(settings);
    paths.prepare()?;

    let artifacts = compile_artifacts(firewall, name)?;
    let mut report = BuildReport::default();
    write_artifacts(&paths, &artifacts, &mut report)?;
    Ok(report)
}

/// Compiles one server's rule set without writing anything.
///
/// # Errors
///
/// Any validation or template error.
pub fn compile_server(firewall: &Firewall, name: &str) -> Result<String> {
    if !firewall.servers.contains_key(name) {
        return Err(Error::ServerNotFound(name.to_string()));
    }
    crate::core::compile(firewall, name)
}

/// Line diff between a fresh compile and the rule set currently on disk.
///
/// A missing file diffs as empty. Returns `None` when nothing changed.
///
/// # Errors
///
/// Any compile error, or I/O errors other than a missing file.
pub fn diff_server(firewall: &Firewall, settings: &Settings, name: &str) -> Result<Option<String>> {
    use std::fmt::Write;

    let new_text = compile_server(firewall, name)?;
    let path = OutputPaths::new(settings)
        .firewall
        .join(firewall_file_name(firewall, name));
    let old_text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if old_text == new_text {
        return Ok(None);
    }

    let diff = similar::TextDiff::from_lines(&old_text, &new_text);
    let mut result = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => "- ",
            similar::ChangeTag::Insert => "+ ",
            similar::ChangeTag::Equal => "  ",
        };
        let _ = write!(result, "{sign}{change}");
    }
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths_layout() {
        let paths = OutputPaths::new(&Settings::with_build_path("/srv/out"));
        assert_eq!(paths.firewall, PathBuf::from("/srv/out/firewall"));
        assert_eq!(paths.hostname, PathBuf::from("/srv/out/hostname"));
        assert_eq!(paths.hosts, PathBuf::from("/srv/out/hosts"));
        assert_eq!(paths.ssh, PathBuf::from("/srv/out/ssh"));
    }

    #[test]
    fn test_prepare_removes_only_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_build_path(dir.path());
        let paths = OutputPaths::new(&settings);
        paths.prepare().unwrap();
        std::fs::write(paths.ssh.join("stale.sh"), "x").unwrap();
        std::fs::write(paths.hosts.join("keep.hosts"), "x").unwrap();

        settings.build_remove_folder_ssh = true;
        let paths = OutputPaths::new(&settings);
        paths.prepare().unwrap();

        assert!(paths.ssh.is_dir());
        assert!(!paths.ssh.join("stale.sh").exists());
        assert!(paths.hosts.join("keep.hosts").exists());
    }

    #[test]
    fn test_prepare_remove_flag_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            build_remove_folder_firewall: true,
            ..Settings::with_build_path(dir.path().join("fresh"))
        };
        assert!(OutputPaths::new(&settings).prepare().is_ok());
    }

    #[test]
    fn test_compile_server_unknown() {
        let fleet = crate::core::test_helpers::three_tier();
        let err = compile_server(&fleet, "ghost").unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::ServerNotFound);
    }

    #[test]
    fn test_diff_missing_file_is_all_insertions() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = crate::core::test_helpers::three_tier();
        let settings = Settings::with_build_path(dir.path());

        let diff = diff_server(&fleet, &settings, "worker").unwrap().unwrap();
        assert!(diff.starts_with("+ *filter\n"));
        assert!(diff.contains("+ ### Server: \"worker\"\n"));
        assert!(diff.lines().all(|l| l.starts_with("+ ")));
    }
}
