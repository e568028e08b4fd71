//! fleetwall - fleet firewall compiler
//!
//! Compiles a declarative fleet topology into one deterministic iptables rule
//! set per server, plus the hostname, hosts and SSH launch files that go with it.
//!
//! # Architecture
//!
//! - [`core`] - Topology model, validation, dependency resolution, templates and emission
//! - [`artifacts`] - Per-server hostname, hosts and SSH script generation
//! - [`builder`] - Output directories, parallel builds, preview and diff
//! - [`validators`] - Field-level input validation
//! - [`config`] - Build settings
//! - [`utils`] - Atomic writes, checksums, XDG directories
//!
//! # Guarantees
//!
//! - Output is byte-identical for identical input, whatever the map insertion order
//! - A server with any invalid reference or undefined template variable produces no output
//! - Generated files are written atomically; rule sets carry a SHA-256 sidecar

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod artifacts;
pub mod builder;
pub mod config;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use builder::{build_all, build_server, compile_server, diff_server};
pub use core::error::{Error, Result};
pub use core::topology::{Firewall, Network, Rule, Server, Service};
