//! `/etc/hosts` generation

use crate::core::error::{Error, Result};
use crate::core::topology::{Firewall, Server};
use std::fmt::Write;

/// Aliases per line before starting a new line for the same address
const LINE_MAX_ALIAS_BYTES: usize = 1000;

/// Writes `<ip>\t\t<host> <host>...`, wrapping long alias lists onto
/// additional lines for the same address.
fn push_hosts(out: &mut String, ip: &str, hosts: &[String]) {
    let mut length = 0;
    let mut line_start = true;
    for host in hosts {
        if length > LINE_MAX_ALIAS_BYTES {
            out.push('\n');
            length = 0;
            line_start = true;
        }
        if line_start {
            let _ = write!(out, "{ip}\t\t");
            line_start = false;
        } else {
            out.push(' ');
        }
        length += host.len();
        out.push_str(host);
    }
    out.push('\n');
}

/// Builds the hosts file for server `name`.
///
/// # Errors
///
/// [`Error::Referential`] if a hosts dependency names the server itself,
/// an unknown server, or a network that server doesn't have.
pub fn render_hosts(firewall: &Firewall, name: &str, server: &Server) -> Result<String> {
    let mut out = String::new();

    let _ = writeln!(out, "### Server: \"{name}\"");
    let _ = writeln!(out, "### Hostname: \"{}\"", server.hostname);
    let _ = writeln!(out, "### IPs: [{}]", server.unique_ips().join(", "));
    out.push_str("127.0.0.1\t\tlocalhost\n");
    let _ = writeln!(out, "127.0.0.1\t\t{}\n", server.hostname);

    if !server.hosts_before.is_empty() {
        let _ = writeln!(out, "# Hosts Before\n{}\n", server.hosts_before);
    }

    if !server.hosts.is_empty() {
        out.push_str("# Custom Hosts\n");
        for (ip, hosts) in &server.hosts {
            push_hosts(&mut out, ip, hosts);
        }
        out.push('\n');
    }

    if !server.hosts_dependencies.is_empty() {
        out.push_str("# Acquired Hosts\n");
        for (remote_name, networks) in &server.hosts_dependencies {
            if remote_name == name {
                return Err(Error::referential(
                    name,
                    "hosts dependency names the server itself",
                ));
            }
            let remote = firewall.servers.get(remote_name).ok_or_else(|| {
                Error::referential(name, format!("hosts dependency server {remote_name:?} not found"))
            })?;
            for network_name in networks {
                let network = remote.networks.get(network_name).ok_or_else(|| {
                    Error::referential(
                        name,
                        format!(
                            "hosts dependency server {remote_name:?} network {network_name:?} not found"
                        ),
                    )
                    .at(Some(network_name), None)
                })?;
                let _ = writeln!(
                    out,
                    "## Server: \"{remote_name}\" Network: \"{network_name}\""
                );
                if !network.hosts.is_empty() {
                    push_hosts(&mut out, &network.ip, &network.hosts);
                }
            }
        }
        out.push('\n');
    }

    if !server.hosts_after.is_empty() {
        let _ = writeln!(out, "# Hosts After\n{}\n", server.hosts_after);
    }

    Ok(out)
}
