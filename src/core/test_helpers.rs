//! Shared test utilities for core module tests
//!
//! Fixture builders for small fleets. This module is only compiled in test mode.

use crate::core::topology::{Firewall, Network, Server, Service};

/// Rule rendered for every acquired ssh link in [`exporter_importer`]
pub const SSH_ACCEPT: &str = "-A INPUT -i {{.DestinationNetworkName}} -s {{.SourceNetwork.IP}} -d {{.DestinationNetwork.IP}} -p tcp --dport {{.DestinationService.Port}} -j ACCEPT";

/// A server with a single empty `lan` network at `ip`
pub fn minimal_server(hostname: &str, ip: &str) -> Server {
    let mut server = Server {
        hostname: hostname.to_string(),
        ..Server::default()
    };
    server.networks.insert("lan".into(), Network::new(ip));
    server
}

/// Two servers on `lan`:
///
/// - `Exporter` (10.0.0.5) offers acquirable `ssh` on port 22
/// - `Importer` (10.0.0.6) depends on `Exporter`/`lan`/`ssh` without a local service
pub fn exporter_importer() -> Firewall {
    let mut exporter = minimal_server("exporter", "10.0.0.5");
    exporter
        .networks
        .get_mut("lan")
        .expect("lan exists")
        .services_acquirable
        .insert("ssh".into(), Service::new(22, [SSH_ACCEPT.into()]));

    let mut importer = minimal_server("importer", "10.0.0.6");
    importer
        .networks
        .get_mut("lan")
        .expect("lan exists")
        .depend_on("Exporter", "lan", "ssh", None);

    let mut firewall = Firewall::default();
    firewall.servers.insert("Exporter".into(), exporter);
    firewall.servers.insert("Importer".into(), importer);
    firewall
}

/// A larger fleet exercising every section: a web tier importing a database,
/// a database exporting mysql to two importers over two networks, and
/// passive/global rules throughout.
pub fn three_tier() -> Firewall {
    let json = r#"{
        "firewall-rules-before": [
            { "rule": ":INPUT DROP [0:0]" },
            { "rule": "-A INPUT -i lo -j ACCEPT" }
        ],
        "firewall-rules-after": [
            { "rule": "-A INPUT -s {{.Firewall.Vars.admin}} -j ACCEPT" }
        ],
        "vars": { "admin": "203.0.113.7" },
        "servers": {
            "db": {
                "hostname": "db-01",
                "networks": {
                    "backend": {
                        "ip": "10.1.0.10",
                        "hosts": ["db", "mysql"],
                        "services-acquirable": {
                            "mysql": {
                                "port": 3306,
                                "rules": [
                                    { "rule": "-A INPUT -i {{.DestinationNetworkName}} -s {{.SourceNetwork.IP}} -p tcp --dport {{.DestinationService.Port}} -j ACCEPT" }
                                ]
                            }
                        },
                        "firewall-rules-after": [
                            { "rule": "-A INPUT -i {{.NetworkName}} -j DROP" }
                        ]
                    },
                    "mgmt": {
                        "ip": "10.9.0.10",
                        "services-passive": {
                            "ssh": {
                                "port": 22,
                                "rules": [
                                    { "rule": "-A INPUT -i {{.NetworkName}} -p tcp --dport {{.Service.Port}} -j ACCEPT" }
                                ]
                            }
                        }
                    }
                }
            },
            "web": {
                "hostname": "web-01",
                "hosts-dependencies": { "db": ["backend"] },
                "networks": {
                    "backend": {
                        "ip": "10.1.0.20",
                        "service-dependencies": {
                            "db": {
                                "backend": {
                                    "mysql": {
                                        "rules": [
                                            { "rule": "-A OUTPUT -d {{.SourceNetwork.IP}} -p tcp --dport {{.SourceService.Port}} -j ACCEPT" }
                                        ]
                                    }
                                }
                            }
                        }
                    },
                    "public": {
                        "ip": "198.51.100.20",
                        "services-passive": {
                            "https": {
                                "port": 443,
                                "rules": [
                                    { "rule": "-A INPUT -i {{.NetworkName}} -p tcp --dport {{.Service.Port}} -j ACCEPT" }
                                ]
                            }
                        }
                    }
                }
            },
            "worker": {
                "hostname": "worker-01",
                "networks": {
                    "backend": {
                        "ip": "10.1.0.30",
                        "service-dependencies": { "db": { "backend": { "mysql": null } } }
                    }
                }
            }
        }
    }"#;
    serde_json::from_str(json).expect("fixture parses")
}
