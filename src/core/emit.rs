//! iptables-restore text output
//!
//! Walks a [`RenderPlan`] in fixed order and renders every rule into one
//! `*filter` table. Sections without rules are left out entirely, including
//! their banner, so unchanged topologies give byte-identical files.

use crate::core::error::{Error, Result, RuleContext};
use crate::core::resolve::{LinkGroups, RenderPlan};
use crate::core::scope::Fields;
use crate::core::template::Template;
use crate::core::topology::Rule;
use std::fmt::Write;

/// Banners are boxed in `#` to the width of their label
fn banner(out: &mut String, label: &str) {
    let rule = "#".repeat(label.len());
    let _ = writeln!(out, "{rule}\n{label}\n{rule}");
}

/// Renders one rule followed by a newline.
///
/// The rule is rendered into its own buffer first, so a failure never leaves
/// half a line in `out`.
fn render_rule(
    out: &mut String,
    rule: &Rule,
    scope: &dyn Fields,
    context: impl FnOnce() -> RuleContext,
) -> Result<()> {
    let rendered = Template::parse(&rule.rule)
        .and_then(|template| template.render(scope))
        .map_err(|source| Error::Template {
            context: context(),
            source,
        })?;
    out.push_str(&rendered);
    out.push('\n');
    Ok(())
}

fn render_rules(
    out: &mut String,
    rules: &[Rule],
    scope: &dyn Fields,
    context: &dyn Fn() -> RuleContext,
) -> Result<()> {
    for rule in rules {
        render_rule(out, rule, scope, context)?;
    }
    Ok(())
}

/// Emits the complete rule set for one server.
///
/// # Errors
///
/// Returns [`Error::Template`] for the first rule that fails to compile or
/// bind, with its server, section, network and service attached.
pub fn emit(plan: &RenderPlan<'_>) -> Result<String> {
    let mut out = String::new();
    let server = plan.server_name;
    let scope = &plan.scope;

    out.push_str("*filter\n\n");
    let _ = writeln!(out, "### Server: \"{server}\"");
    let _ = writeln!(out, "### Hostname: \"{}\"", plan.server.hostname);
    let _ = writeln!(out, "### IPs: [{}]\n", plan.ips.join(", "));

    // Server-wide sections end with a blank line
    let server_sections = [
        ("# Global Rules Before #", "global rules before", plan.global_before),
        ("# Server Rules Before #", "server rules before", plan.server_before),
    ];
    for (label, section, rules) in server_sections {
        if rules.is_empty() {
            continue;
        }
        banner(&mut out, label);
        render_rules(&mut out, rules, scope, &|| RuleContext::new(server, section))?;
        out.push('\n');
    }

    if !plan.networks.is_empty() {
        banner(&mut out, "# Networks #");
        for (i, (&network_name, network)) in plan.networks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "### Network: {network_name}");
            let _ = writeln!(out, "### IP: {}", network.scope.network.ip);

            if !network.before.is_empty() {
                banner(&mut out, "# Network Rules Before #");
                render_rules(&mut out, network.before, &network.scope, &|| {
                    RuleContext::new(server, "network rules before").network(network_name)
                })?;
            }

            if !network.passive.is_empty() {
                banner(&mut out, "## Passive Services ##");
                for (&service_name, passive) in &network.passive {
                    let _ = writeln!(out, "### Service: {service_name}");
                    render_rules(&mut out, &passive.service.rules, passive, &|| {
                        RuleContext::new(server, "passive service")
                            .network(network_name)
                            .service(service_name)
                    })?;
                }
            }

            emit_links(
                &mut out,
                "## Acquirable Services ##",
                "acquirable service",
                server,
                network_name,
                &network.acquirable,
            )?;
            emit_links(
                &mut out,
                "## Dependency Services ##",
                "dependency service",
                server,
                network_name,
                &network.dependencies,
            )?;

            if !network.after.is_empty() {
                banner(&mut out, "# Network Rules After #");
                render_rules(&mut out, network.after, &network.scope, &|| {
                    RuleContext::new(server, "network rules after").network(network_name)
                })?;
            }
        }
        out.push('\n');
    }

    let server_sections = [
        ("# Server Rules After #", "server rules after", plan.server_after),
        ("# Global Rules After #", "global rules after", plan.global_after),
    ];
    for (label, section, rules) in server_sections {
        if rules.is_empty() {
            continue;
        }
        banner(&mut out, label);
        render_rules(&mut out, rules, scope, &|| RuleContext::new(server, section))?;
        out.push('\n');
    }

    out.push_str("### COMMIT !!!\n\nCOMMIT\n");
    Ok(out)
}

/// Emits acquirable or dependency groups.
///
/// The source header is written once per (service, source server) group,
/// taken from its first link.
fn emit_links(
    out: &mut String,
    label: &str,
    section: &'static str,
    server: &str,
    network_name: &str,
    groups: &LinkGroups<'_>,
) -> Result<()> {
    if groups.is_empty() {
        return Ok(());
    }

    banner(out, label);
    for (&service_name, sources) in groups {
        let _ = writeln!(out, "### Service: {service_name}");
        for links in sources.values() {
            let Some(first) = links.first() else {
                continue;
            };
            let _ = writeln!(out, "## Source Server: {}", first.source_server_name);
            let _ = writeln!(out, "## Source Hostname: {}", first.source_server.hostname);
            match first.source_port() {
                Some(port) => {
                    let _ = writeln!(out, "## Source IP:Port: {}:{port}", first.source_network.ip);
                }
                None => {
                    let _ = writeln!(out, "## Source IP: {}", first.source_network.ip);
                }
            }

            for link in links {
                render_rules(out, &link.destination_service.rules, link, &|| {
                    RuleContext::new(server, section)
                        .network(network_name)
                        .service(service_name)
                })?;
            }
        }
    }
    Ok(())
}
