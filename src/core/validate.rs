//! Fleet validation
//!
//! Two independent passes:
//!
//! - [`validate_structure`] checks every entity on its own, bottom-up
//!   (service → network → server → firewall). It runs once before any build.
//! - [`check_relations`] checks every dependency edge touching one server,
//!   inbound and outbound. It runs before anything is written for that server.
//!
//! Both stop at the first violation.

use crate::core::error::{Error, Result};
use crate::core::topology::{Firewall, Network, Rule, Server, Service, Ssh};
use crate::validators::{
    validate_flag, validate_host, validate_ip, validate_name, validate_port, validate_rule,
};

/// Validates every entity in the fleet.
///
/// # Errors
///
/// Returns [`Error::Structural`] naming the first offending entity, e.g.
/// `servers["web"].networks["lan"].ip`.
pub fn validate_structure(firewall: &Firewall) -> Result<()> {
    if firewall.servers.is_empty() {
        return Err(Error::structural("servers", "servers empty"));
    }

    for (name, server) in &firewall.servers {
        let path = format!("servers[{name:?}]");
        validate_name(name).map_err(|e| Error::structural(&path, e))?;
        validate_server(server, &path)?;
    }

    validate_rules(&firewall.firewall_rules_before, "firewall-rules-before")?;
    validate_rules(&firewall.firewall_rules_after, "firewall-rules-after")?;

    Ok(())
}

fn validate_server(server: &Server, path: &str) -> Result<()> {
    if server.hostname.is_empty() {
        return Err(Error::structural(format!("{path}.hostname"), "hostname empty"));
    }

    for (ip, hosts) in &server.hosts {
        let at = format!("{path}.hosts[{ip:?}]");
        validate_ip(ip).map_err(|e| Error::structural(&at, e))?;
        if hosts.is_empty() {
            return Err(Error::structural(at, "hosts empty"));
        }
        for host in hosts {
            validate_host(host).map_err(|e| Error::structural(&at, e))?;
        }
    }

    for (name, networks) in &server.hosts_dependencies {
        let at = format!("{path}.hosts-dependencies[{name:?}]");
        validate_name(name).map_err(|e| Error::structural(&at, e))?;
        if networks.is_empty() {
            return Err(Error::structural(at, "networks empty"));
        }
        for network in networks {
            validate_name(network).map_err(|e| Error::structural(&at, e))?;
        }
    }

    for (name, ssh) in &server.ssh {
        let at = format!("{path}.ssh[{name:?}]");
        validate_name(name).map_err(|e| Error::structural(&at, e))?;
        validate_ssh(ssh).map_err(|e| Error::structural(&at, e))?;
    }

    validate_rules(
        &server.firewall_rules_before,
        &format!("{path}.firewall-rules-before"),
    )?;
    validate_rules(
        &server.firewall_rules_after,
        &format!("{path}.firewall-rules-after"),
    )?;

    if server.networks.is_empty() {
        return Err(Error::structural(format!("{path}.networks"), "networks empty"));
    }

    for (name, network) in &server.networks {
        let at = format!("{path}.networks[{name:?}]");
        validate_name(name).map_err(|e| Error::structural(&at, e))?;
        validate_network(network, &at)?;
    }

    Ok(())
}

fn validate_network(network: &Network, path: &str) -> Result<()> {
    validate_ip(&network.ip).map_err(|e| Error::structural(format!("{path}.ip"), e))?;

    for host in &network.hosts {
        validate_host(host).map_err(|e| Error::structural(format!("{path}.hosts"), e))?;
    }

    for (name, service) in &network.services_passive {
        let at = format!("{path}.services-passive[{name:?}]");
        validate_name(name).map_err(|e| Error::structural(&at, e))?;
        validate_service(service, &at)?;
    }

    for (name, service) in &network.services_acquirable {
        let at = format!("{path}.services-acquirable[{name:?}]");
        validate_name(name).map_err(|e| Error::structural(&at, e))?;
        validate_service(service, &at)?;
    }

    // Local services on dependency edges may carry only a source port, so an
    // empty rule list is fine there. Rule text still can't be empty.
    for (server, networks) in &network.service_dependencies {
        let at = format!("{path}.service-dependencies[{server:?}]");
        validate_name(server).map_err(|e| Error::structural(&at, e))?;
        for (network_name, services) in networks {
            let at = format!("{at}[{network_name:?}]");
            validate_name(network_name).map_err(|e| Error::structural(&at, e))?;
            for (service, local) in services {
                let at = format!("{at}[{service:?}]");
                validate_name(service).map_err(|e| Error::structural(&at, e))?;
                if let Some(local) = local {
                    validate_rules(&local.rules, &format!("{at}.rules"))?;
                }
            }
        }
    }

    validate_rules(
        &network.firewall_rules_before,
        &format!("{path}.firewall-rules-before"),
    )?;
    validate_rules(
        &network.firewall_rules_after,
        &format!("{path}.firewall-rules-after"),
    )?;

    Ok(())
}

fn validate_service(service: &Service, path: &str) -> Result<()> {
    if service.rules.is_empty() {
        return Err(Error::structural(format!("{path}.rules"), "rules empty"));
    }
    validate_rules(&service.rules, &format!("{path}.rules"))
}

fn validate_rules(rules: &[Rule], path: &str) -> Result<()> {
    for (i, rule) in rules.iter().enumerate() {
        validate_rule(&rule.rule).map_err(|e| Error::structural(format!("{path}[{i}]"), e))?;
    }
    Ok(())
}

fn validate_ssh(ssh: &Ssh) -> std::result::Result<(), String> {
    if ssh.host.is_empty() {
        return Err("host empty".to_string());
    }

    for flag in &ssh.flags {
        validate_flag(flag)?;
    }

    if ssh.tunnel {
        validate_port(ssh.remote_port).map_err(|e| format!("remote-port: {e}"))?;
        validate_port(ssh.local_port).map_err(|e| format!("local-port: {e}"))?;

        if ssh.tunnel_reverse {
            if ssh.local_host.is_empty() {
                return Err("reverse tunnel needs local-host".to_string());
            }
        } else if ssh.remote_host.is_empty() {
            return Err("tunnel needs remote-host".to_string());
        }
    }

    Ok(())
}

/// Checks every dependency edge that touches `name`.
///
/// - no network of `name` depends on `name` itself
/// - every other server's edge that targets `name` names one of its networks
///   and an acquirable service on it
/// - every edge declared by `name` targets an existing server, network and
///   acquirable service
///
/// # Errors
///
/// Returns [`Error::ServerNotFound`] for an unknown `name`, otherwise
/// [`Error::Referential`] with the offending network and service attached.
pub fn check_relations(firewall: &Firewall, name: &str) -> Result<()> {
    let server = firewall
        .servers
        .get(name)
        .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;

    for (network_name, network) in &server.networks {
        if network.service_dependencies.contains_key(name) {
            return Err(Error::referential(
                name,
                "server depends on its own services",
            )
            .at(Some(network_name), None));
        }
    }

    // Inbound: whoever imports from us must name something we export
    for (importer, other) in &firewall.servers {
        if importer == name {
            continue;
        }
        for network in other.networks.values() {
            let Some(wanted) = network.service_dependencies.get(name) else {
                continue;
            };
            for (network_name, services) in wanted {
                let Some(ours) = server.networks.get(network_name) else {
                    return Err(Error::referential(
                        name,
                        format!(
                            "acquiring server {importer:?} requested network {network_name:?} that doesn't exist"
                        ),
                    )
                    .at(Some(network_name), None));
                };
                for service_name in services.keys() {
                    if !ours.services_acquirable.contains_key(service_name) {
                        return Err(Error::referential(
                            name,
                            format!(
                                "acquiring server {importer:?} requested network {network_name:?} service {service_name:?} that doesn't exist"
                            ),
                        )
                        .at(Some(network_name), Some(service_name)));
                    }
                }
            }
        }
    }

    // Outbound: everything we import must exist
    for network in server.networks.values() {
        for (remote, networks) in &network.service_dependencies {
            let Some(remote_server) = firewall.servers.get(remote) else {
                return Err(Error::referential(
                    name,
                    format!("dependent server {remote:?} doesn't exist"),
                ));
            };
            for (remote_network_name, services) in networks {
                let Some(remote_network) = remote_server.networks.get(remote_network_name) else {
                    return Err(Error::referential(
                        name,
                        format!(
                            "dependent server {remote:?} network {remote_network_name:?} doesn't exist"
                        ),
                    )
                    .at(Some(remote_network_name), None));
                };
                for service_name in services.keys() {
                    if !remote_network.services_acquirable.contains_key(service_name) {
                        return Err(Error::referential(
                            name,
                            format!(
                                "dependent server {remote:?} network {remote_network_name:?} service {service_name:?} doesn't exist"
                            ),
                        )
                        .at(Some(remote_network_name), Some(service_name)));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Structural validation followed by every server's relational check
///
/// # Errors
///
/// The first structural or relational failure.
pub fn validate(firewall: &Firewall) -> Result<()> {
    validate_structure(firewall)?;
    for name in firewall.servers.keys() {
        check_relations(firewall, name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::test_helpers::{exporter_importer, minimal_server};
    use crate::core::topology::Ssh;

    #[test]
    fn test_valid_fleet_passes() {
        let fleet = exporter_importer();
        assert!(validate(&fleet).is_ok());
    }

    #[test]
    fn test_empty_fleet_fails() {
        let err = validate_structure(&Firewall::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralInvalid);
    }

    #[test]
    fn test_server_without_networks_fails() {
        let mut fleet = exporter_importer();
        fleet.servers.get_mut("Importer").unwrap().networks.clear();

        let err = validate_structure(&fleet).unwrap_err();
        match err {
            Error::Structural { path, message } => {
                assert_eq!(path, "servers[\"Importer\"].networks");
                assert_eq!(message, "networks empty");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_ip_reports_path() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Exporter")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .ip = "10.0.0.300".into();

        let err = validate_structure(&fleet).unwrap_err();
        assert!(
            err.to_string()
                .contains("servers[\"Exporter\"].networks[\"lan\"].ip")
        );
    }

    #[test]
    fn test_empty_hostname_fails() {
        let mut fleet = exporter_importer();
        fleet.servers.get_mut("Exporter").unwrap().hostname.clear();
        assert!(validate_structure(&fleet).is_err());
    }

    #[test]
    fn test_service_without_rules_fails() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Exporter")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .services_acquirable
            .get_mut("ssh")
            .unwrap()
            .rules
            .clear();
        assert!(validate_structure(&fleet).is_err());
    }

    #[test]
    fn test_empty_rule_text_fails() {
        let mut fleet = exporter_importer();
        fleet.firewall_rules_after.push(Rule::new(""));
        let err = validate_structure(&fleet).unwrap_err();
        assert!(err.to_string().contains("firewall-rules-after[0]"));
    }

    #[test]
    fn test_dependency_local_service_may_be_port_only() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .depend_on("Exporter", "lan", "ssh", Some(Service::new(2222, [])));
        assert!(validate(&fleet).is_ok());
    }

    #[test]
    fn test_dependency_on_unknown_server_without_networks_fails() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .service_dependencies
            .entry("Ghost".into())
            .or_default();

        assert!(validate_structure(&fleet).is_ok());
        let err = check_relations(&fleet, "Importer").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferentialInvalid);
        assert!(err.to_string().contains("\"Ghost\""));
    }

    #[test]
    fn test_dependency_on_unknown_network_without_services_fails() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .service_dependencies
            .entry("Exporter".into())
            .or_default()
            .entry("dmz".into())
            .or_default();

        let err = check_relations(&fleet, "Importer").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferentialInvalid);
    }

    #[test]
    fn test_empty_dependency_key_fails() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .service_dependencies
            .entry(String::new())
            .or_default();

        let err = validate(&fleet).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralInvalid);
        assert!(err.to_string().contains("service-dependencies[\"\"]"));
    }

    #[test]
    fn test_ssh_tunnel_requirements() {
        let mut ssh = Ssh {
            host: "bastion".into(),
            tunnel: true,
            local_port: 8080,
            remote_port: 80,
            ..Ssh::default()
        };
        assert!(validate_ssh(&ssh).is_err());
        ssh.remote_host = "127.0.0.1".into();
        assert!(validate_ssh(&ssh).is_ok());

        ssh.tunnel_reverse = true;
        assert!(validate_ssh(&ssh).is_err());
        ssh.local_host = "127.0.0.1".into();
        assert!(validate_ssh(&ssh).is_ok());

        ssh.local_port = 0;
        assert!(validate_ssh(&ssh).is_err());
    }

    #[test]
    fn test_hosts_entries_checked() {
        let mut fleet = exporter_importer();
        let server = fleet.servers.get_mut("Exporter").unwrap();
        server.hosts.insert("not-an-ip".into(), vec!["x".into()]);
        assert!(validate_structure(&fleet).is_err());

        let server = fleet.servers.get_mut("Exporter").unwrap();
        server.hosts.clear();
        server.hosts.insert("10.0.0.9".into(), Vec::new());
        assert!(validate_structure(&fleet).is_err());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Exporter")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .depend_on("Exporter", "lan", "ssh", None);

        let err = check_relations(&fleet, "Exporter").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferentialInvalid);
    }

    #[test]
    fn test_inbound_missing_network_rejected() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .depend_on("Exporter", "dmz", "ssh", None);

        // Caught on both ends
        assert!(check_relations(&fleet, "Exporter").is_err());
        assert!(check_relations(&fleet, "Importer").is_err());
    }

    #[test]
    fn test_inbound_missing_service_rejected() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .depend_on("Exporter", "lan", "mysql", None);

        match check_relations(&fleet, "Exporter").unwrap_err() {
            Error::Referential {
                server,
                network,
                service,
                ..
            } => {
                assert_eq!(server, "Exporter");
                assert_eq!(network.as_deref(), Some("lan"));
                assert_eq!(service.as_deref(), Some("mysql"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_outbound_unknown_server_rejected() {
        let mut fleet = exporter_importer();
        fleet
            .servers
            .get_mut("Importer")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap()
            .depend_on("Ghost", "lan", "ssh", None);

        assert!(check_relations(&fleet, "Importer").is_err());
        // Exporter isn't involved
        assert!(check_relations(&fleet, "Exporter").is_ok());
    }

    #[test]
    fn test_passive_only_service_not_acquirable() {
        let mut fleet = exporter_importer();
        let lan = fleet
            .servers
            .get_mut("Exporter")
            .unwrap()
            .networks
            .get_mut("lan")
            .unwrap();
        let ssh = lan.services_acquirable.remove("ssh").unwrap();
        lan.services_passive.insert("ssh".into(), ssh);

        assert!(check_relations(&fleet, "Importer").is_err());
    }

    #[test]
    fn test_unknown_server() {
        let fleet = exporter_importer();
        let err = check_relations(&fleet, "Nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerNotFound);
    }

    #[test]
    fn test_removing_referenced_server_fails() {
        let mut fleet = exporter_importer();
        fleet.servers.remove("Exporter");
        fleet.servers.insert("Other".into(), minimal_server("other", "10.0.0.8"));
        assert!(validate(&fleet).is_err());
    }
}
