//! Core policy compiler
//!
//! This module turns a fleet topology into per-server iptables rule sets.
//! It provides:
//!
//! - [`topology`]: Data structures for servers, networks, services and dependency edges
//! - [`validate`]: Structural and relational checks
//! - [`resolve`]: Per-server render plans
//! - [`scope`]: Variable scopes visible to rule templates
//! - [`template`]: The strict rule template engine
//! - [`emit`]: iptables-restore text output
//! - [`loader`]: Topology file loading and saving with checksums
//! - [`error`]: Error types for compiler operations

pub mod emit;
pub mod error;
pub mod loader;
pub mod resolve;
pub mod scope;
pub mod template;
pub mod topology;
pub mod validate;

use error::Result;
use topology::Firewall;

/// Validates the whole fleet, then compiles the rule set for `name`.
///
/// # Errors
///
/// Any structural, relational or template error. Nothing is returned for a
/// server that fails.
pub fn compile(firewall: &Firewall, name: &str) -> Result<String> {
    validate::validate_structure(firewall)?;
    compile_prevalidated(firewall, name)
}

/// Compiles the rule set for `name` assuming structural validation already ran.
///
/// Still runs the relational check for `name`.
///
/// # Errors
///
/// Any relational or template error.
pub fn compile_prevalidated(firewall: &Firewall, name: &str) -> Result<String> {
    validate::check_relations(firewall, name)?;
    let plan = resolve::resolve(firewall, name)?;
    emit::emit(&plan)
}

#[cfg(test)]
pub mod test_helpers;
