//! Per-server output files
//!
//! Every server gets four kinds of artifact:
//!
//! - [`ArtifactKind::Firewall`]: `<name>.iptables`
//! - [`ArtifactKind::Hostname`]: `<name>.hostname`
//! - [`ArtifactKind::Hosts`]: `<name>.hosts`
//! - [`ArtifactKind::Ssh`]: `<name>-<service>.sh`, one per ssh entry
//!
//! [`compile_artifacts`] produces all of them in memory; nothing touches the
//! disk until the caller writes the returned [`Artifacts`].

pub mod hosts;
pub mod ssh;

use crate::core::compile_prevalidated;
use crate::core::error::{Error, Result};
use crate::core::topology::Firewall;

/// Output directory an artifact belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::AsRefStr, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactKind {
    Firewall,
    Hostname,
    Hosts,
    Ssh,
}

impl ArtifactKind {
    /// Unix file mode for artifacts of this kind
    pub const fn mode(self) -> u32 {
        match self {
            ArtifactKind::Ssh => 0o755,
            ArtifactKind::Firewall | ArtifactKind::Hostname | ArtifactKind::Hosts => 0o644,
        }
    }
}

/// One generated file, relative to its kind's directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub contents: String,
}

/// Everything generated for one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub server: String,
    pub files: Vec<Artifact>,
}

impl Artifacts {
    pub fn get(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.files.iter().filter(move |a| a.kind == kind)
    }
}

/// File name of a server's rule set, e.g. `web.iptables`
pub fn firewall_file_name(firewall: &Firewall, name: &str) -> String {
    format!("{name}.{}", firewall.firewall_type.file_extension())
}

/// Builds every artifact for `name`.
///
/// Assumes structural validation already passed; runs the relational check.
///
/// # Errors
///
/// Any relational, template or hosts-dependency error. No artifacts are
/// returned for a failing server.
pub fn compile_artifacts(firewall: &Firewall, name: &str) -> Result<Artifacts> {
    let server = firewall
        .servers
        .get(name)
        .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;

    let mut files = vec![
        Artifact {
            kind: ArtifactKind::Firewall,
            file_name: firewall_file_name(firewall, name),
            contents: compile_prevalidated(firewall, name)?,
        },
        Artifact {
            kind: ArtifactKind::Hostname,
            file_name: format!("{name}.hostname"),
            contents: format!("{}\n", server.hostname),
        },
        Artifact {
            kind: ArtifactKind::Hosts,
            file_name: format!("{name}.hosts"),
            contents: hosts::render_hosts(firewall, name, server)?,
        },
    ];

    files.extend(server.ssh.iter().map(|(service, entry)| Artifact {
        kind: ArtifactKind::Ssh,
        file_name: ssh::script_name(name, service),
        contents: ssh::render_ssh(name, service, entry),
    }));

    Ok(Artifacts {
        server: name.to_string(),
        files,
    })
}
