//! Per-server render plans
//!
//! [`resolve`] walks the fleet once for a single server and collects every
//! rule that ends up in its rule set, each paired with the scope it renders
//! against. The plan only borrows from the fleet; scopes are small `Copy`
//! records of references.
//!
//! Link groups are keyed `[service][source server]` and hold one
//! [`LinkScope`] per source network, in ascending network order. Rules of a
//! link come from [`LinkScope::destination_service`]:
//!
//! - acquirable links: our exported service
//! - dependency links: the local service attached to our import

use crate::core::error::{Error, Result};
use crate::core::scope::{LinkScope, NetworkScope, PassiveScope, ServerScope};
use crate::core::topology::{Firewall, Rule, Server};
use std::collections::BTreeMap;
use tracing::debug;

/// `[service][source server] → links`
pub type LinkGroups<'a> = BTreeMap<&'a str, BTreeMap<&'a str, Vec<LinkScope<'a>>>>;

/// Everything needed to emit one server's rule set
#[derive(Debug)]
pub struct RenderPlan<'a> {
    pub server_name: &'a str,
    pub server: &'a Server,
    /// Unique network addresses, sorted
    pub ips: Vec<&'a str>,
    /// Shared by global and server rules
    pub scope: ServerScope<'a>,
    pub global_before: &'a [Rule],
    pub server_before: &'a [Rule],
    /// Only networks that contribute at least one rule
    pub networks: BTreeMap<&'a str, NetworkPlan<'a>>,
    pub server_after: &'a [Rule],
    pub global_after: &'a [Rule],
}

#[derive(Debug)]
pub struct NetworkPlan<'a> {
    pub scope: NetworkScope<'a>,
    pub before: &'a [Rule],
    pub passive: BTreeMap<&'a str, PassiveScope<'a>>,
    pub acquirable: LinkGroups<'a>,
    pub dependencies: LinkGroups<'a>,
    pub after: &'a [Rule],
}

impl<'a> NetworkPlan<'a> {
    fn new(scope: NetworkScope<'a>) -> Self {
        Self {
            scope,
            before: &scope.network.firewall_rules_before,
            passive: BTreeMap::new(),
            acquirable: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            after: &scope.network.firewall_rules_after,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.passive.is_empty()
            && self.acquirable.is_empty()
            && self.dependencies.is_empty()
            && self.after.is_empty()
    }
}

impl RenderPlan<'_> {
    /// Number of rule templates the plan will render
    pub fn rule_count(&self) -> usize {
        let links = |groups: &LinkGroups<'_>| -> usize {
            groups
                .values()
                .flat_map(BTreeMap::values)
                .flatten()
                .map(|link| link.destination_service.rules.len())
                .sum()
        };

        let networks: usize = self
            .networks
            .values()
            .map(|n| {
                n.before.len()
                    + n.after.len()
                    + n.passive.values().map(|p| p.service.rules.len()).sum::<usize>()
                    + links(&n.acquirable)
                    + links(&n.dependencies)
            })
            .sum();

        self.global_before.len()
            + self.server_before.len()
            + networks
            + self.server_after.len()
            + self.global_after.len()
    }
}

/// Builds the render plan for `name`.
///
/// Expects a fleet that passed [`crate::core::validate::check_relations`] for
/// `name`. Inbound edges that don't match one of our acquirable services are
/// skipped; outbound edges that don't resolve are an error.
///
/// # Errors
///
/// [`Error::ServerNotFound`] for an unknown server, [`Error::Referential`] for
/// a dangling outbound dependency.
pub fn resolve<'a>(firewall: &'a Firewall, name: &str) -> Result<RenderPlan<'a>> {
    let (server_name, server) = firewall
        .servers
        .get_key_value(name)
        .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
    let server_name = server_name.as_str();

    let scope = ServerScope {
        server_name,
        server,
        firewall,
    };

    let mut networks: BTreeMap<&str, NetworkPlan<'_>> = server
        .networks
        .iter()
        .map(|(network_name, network)| {
            let network_scope = NetworkScope {
                server_name,
                server,
                network_name,
                network,
                firewall,
            };
            let mut plan = NetworkPlan::new(network_scope);
            for (service_name, service) in &network.services_passive {
                plan.passive
                    .insert(service_name, network_scope.service(service_name, service));
            }
            (network_name.as_str(), plan)
        })
        .collect();

    // Inbound: other servers importing our acquirable services
    for (&network_name, plan) in &mut networks {
        let network = plan.scope.network;
        for (importer_name, importer) in &firewall.servers {
            if importer_name == server_name {
                continue;
            }
            for (importer_network_name, importer_network) in &importer.networks {
                let Some(services) = importer_network
                    .service_dependencies
                    .get(server_name)
                    .and_then(|networks| networks.get(network_name))
                else {
                    continue;
                };
                for (service_name, local) in services {
                    let Some(service) = network.services_acquirable.get(service_name) else {
                        continue;
                    };
                    plan.acquirable
                        .entry(service_name.as_str())
                        .or_default()
                        .entry(importer_name.as_str())
                        .or_default()
                        .push(LinkScope {
                            service_name,
                            source_server_name: importer_name,
                            source_server: importer,
                            source_network_name: importer_network_name,
                            source_network: importer_network,
                            source_service: local.as_ref(),
                            destination_server_name: server_name,
                            destination_server: server,
                            destination_network_name: network_name,
                            destination_network: network,
                            destination_service: service,
                            firewall,
                        });
                }
            }
        }
    }

    // Outbound: our imports that carry local rules
    for (&network_name, plan) in &mut networks {
        let network = plan.scope.network;
        for (remote_name, remote_network_name, service_name, local) in network.dependency_edges()
        {
            let Some(local) = local.filter(|s| !s.rules.is_empty()) else {
                continue;
            };
            let (remote_name, remote) = firewall
                .servers
                .get_key_value(remote_name)
                .ok_or_else(|| {
                    Error::referential(
                        server_name,
                        format!("dependent server {remote_name:?} doesn't exist"),
                    )
                })?;
            let (remote_network_name, remote_network) = remote
                .networks
                .get_key_value(remote_network_name)
                .ok_or_else(|| {
                    Error::referential(
                        server_name,
                        format!(
                            "dependent server {remote_name:?} network {remote_network_name:?} doesn't exist"
                        ),
                    )
                    .at(Some(remote_network_name), None)
                })?;
            let exported = remote_network
                .services_acquirable
                .get(service_name)
                .ok_or_else(|| {
                    Error::referential(
                        server_name,
                        format!(
                            "dependent server {remote_name:?} network {remote_network_name:?} service {service_name:?} doesn't exist"
                        ),
                    )
                    .at(Some(remote_network_name), Some(service_name))
                })?;

            plan.dependencies
                .entry(service_name)
                .or_default()
                .entry(remote_name.as_str())
                .or_default()
                .push(LinkScope {
                    service_name,
                    source_server_name: remote_name,
                    source_server: remote,
                    source_network_name: remote_network_name,
                    source_network: remote_network,
                    source_service: Some(exported),
                    destination_server_name: server_name,
                    destination_server: server,
                    destination_network_name: network_name,
                    destination_network: network,
                    destination_service: local,
                    firewall,
                });
        }
    }

    networks.retain(|_, plan| !plan.is_empty());

    let plan = RenderPlan {
        server_name,
        server,
        ips: server.unique_ips(),
        scope,
        global_before: &firewall.firewall_rules_before,
        server_before: &server.firewall_rules_before,
        networks,
        server_after: &server.firewall_rules_after,
        global_after: &firewall.firewall_rules_after,
    };

    debug!(
        server = server_name,
        networks = plan.networks.len(),
        rules = plan.rule_count(),
        "Resolved render plan"
    );

    Ok(plan)
}
