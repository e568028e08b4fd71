//! Fleet topology data structures
//!
//! The topology is a plain graph of name-keyed maps:
//!
//! ```text
//! Firewall
//!  └─ servers[name] → Server
//!      └─ networks[name] → Network
//!          ├─ services-passive[name]    → Service   (always allowed)
//!          ├─ services-acquirable[name] → Service   (allowed once someone depends on it)
//!          └─ service-dependencies[server][network][service] → Option<Service>
//! ```
//!
//! Every collection is a [`BTreeMap`], so iteration is always in ascending key
//! order. Emitted rule sets rely on that to stay byte-identical between builds.
//!
//! # Example
//!
//! ```
//! use fleetwall::core::topology::Firewall;
//!
//! let fleet: Firewall = serde_json::from_str(r#"{
//!     "servers": {
//!         "web": {
//!             "hostname": "web-01",
//!             "networks": { "lan": { "ip": "10.0.0.2" } }
//!         }
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(fleet.servers["web"].networks["lan"].ip, "10.0.0.2");
//! ```

use serde::{Deserialize, Deserializer, Serialize, de};
use std::collections::BTreeMap;

/// Free-form template variables attached to firewalls, servers, networks and services
pub type Vars = BTreeMap<String, serde_json::Value>;

/// `[remote server][remote network][service] → optional local service`
///
/// A `None` leaf declares the dependency without adding any local rules.
pub type ServiceDependencies = BTreeMap<String, BTreeMap<String, BTreeMap<String, Option<Service>>>>;

/// Target packet-filter dialect
///
/// Deserializes from its name or from the numeric code older topology files
/// store (`1` = iptables).
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum RuleSystem {
    /// iptables-restore format
    #[default]
    #[serde(rename = "iptables")]
    #[strum(serialize = "iptables")]
    Iptables,
}

impl<'de> Deserialize<'de> for RuleSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Code(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) => name
                .parse()
                .map_err(|_| de::Error::unknown_variant(&name, &["iptables"])),
            Repr::Code(1) => Ok(RuleSystem::Iptables),
            Repr::Code(code) => Err(de::Error::custom(format!(
                "unknown firewall-type code {code}"
            ))),
        }
    }
}

impl RuleSystem {
    /// File extension used for generated rule sets
    pub const fn file_extension(self) -> &'static str {
        match self {
            RuleSystem::Iptables => "iptables",
        }
    }
}

/// A single rule template in the target rule language
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Rule {
    #[serde(default)]
    pub rule: String,
}

impl Rule {
    pub fn new(rule: impl Into<String>) -> Self {
        Self { rule: rule.into() }
    }
}

impl From<&str> for Rule {
    fn from(rule: &str) -> Self {
        Self::new(rule)
    }
}

/// The whole fleet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Firewall {
    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
    #[serde(default)]
    pub firewall_type: RuleSystem,
    /// Rendered before every server's own rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall_rules_before: Vec<Rule>,
    /// Rendered after every server's own rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall_rules_after: Vec<Rule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: Vars,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    /// Written to `/etc/hostname` and used in `/etc/hosts`
    #[serde(default)]
    pub hostname: String,
    /// Extra local `/etc/hosts` entries: `[ip] → hosts`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hosts: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hosts_before: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hosts_after: String,
    /// Other servers' network aliases to import: `[server] → networks`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hosts_dependencies: BTreeMap<String, Vec<String>>,
    /// SSH launch scripts, keyed by an arbitrary service name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ssh: BTreeMap<String, Ssh>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall_rules_before: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall_rules_after: Vec<Rule>,
    /// Network names double as interface names in rule templates
    #[serde(default)]
    pub networks: BTreeMap<String, Network>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: Vars,
}

impl Server {
    /// Unique network addresses, sorted by their textual form
    pub fn unique_ips(&self) -> Vec<&str> {
        let mut ips: Vec<&str> = self.networks.values().map(|n| n.ip.as_str()).collect();
        ips.sort_unstable();
        ips.dedup();
        ips
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Network {
    #[serde(default)]
    pub ip: String,
    /// Aliases other servers import into their `/etc/hosts`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services_passive: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services_acquirable: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_dependencies: ServiceDependencies,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall_rules_before: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall_rules_after: Vec<Rule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: Vars,
}

impl Network {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    /// Declares a dependency on `server`/`network`/`service`.
    ///
    /// `local` carries rules rendered on this side once the dependency resolves.
    pub fn depend_on(
        &mut self,
        server: impl Into<String>,
        network: impl Into<String>,
        service: impl Into<String>,
        local: Option<Service>,
    ) {
        self.service_dependencies
            .entry(server.into())
            .or_default()
            .entry(network.into())
            .or_default()
            .insert(service.into(), local);
    }

    /// Iterates every dependency edge as `(server, network, service, local)`
    pub fn dependency_edges(&self) -> impl Iterator<Item = (&str, &str, &str, Option<&Service>)> {
        self.service_dependencies
            .iter()
            .flat_map(|(server, networks)| {
                networks.iter().flat_map(move |(network, services)| {
                    services.iter().map(move |(service, local)| {
                        (
                            server.as_str(),
                            network.as_str(),
                            service.as_str(),
                            local.as_ref(),
                        )
                    })
                })
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    /// 0 means no port
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: Vars,
}

impl Service {
    pub fn new(port: u16, rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            port,
            rules: rules.into_iter().collect(),
            vars: Vars::new(),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes by reference
fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// SSH connection or tunnel launch script
///
/// Forward tunnel: `ssh -L [local-host:]local-port:remote-host:remote-port`
/// Reverse tunnel: `ssh -R [remote-host:]remote-port:local-host:local-port`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[allow(clippy::struct_excessive_bools)]
pub struct Ssh {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    /// Identity file passed with `-i`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default)]
    pub tunnel: bool,
    #[serde(default)]
    pub tunnel_reverse: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_host: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub local_port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_host: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub remote_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_dependency_is_none() {
        let network: Network = serde_json::from_str(
            r#"{
                "ip": "10.0.0.1",
                "service-dependencies": {
                    "db": { "lan": { "mysql": null, "ssh": { "port": 22, "rules": [{ "rule": "-A INPUT" }] } } }
                }
            }"#,
        )
        .unwrap();

        let edges: Vec<_> = network.dependency_edges().collect();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].2, "mysql");
        assert!(edges[0].3.is_none());
        assert_eq!(edges[1].2, "ssh");
        assert_eq!(edges[1].3.map(|s| s.port), Some(22));
    }

    #[test]
    fn test_unique_ips_sorted_and_deduped() {
        let mut server = Server::default();
        server.networks.insert("b".into(), Network::new("192.168.1.1"));
        server.networks.insert("a".into(), Network::new("10.0.0.1"));
        server.networks.insert("c".into(), Network::new("10.0.0.1"));

        assert_eq!(server.unique_ips(), vec!["10.0.0.1", "192.168.1.1"]);
    }

    #[test]
    fn test_firewall_type_defaults_to_iptables() {
        let fleet: Firewall = serde_json::from_str("{}").unwrap();
        assert_eq!(fleet.firewall_type, RuleSystem::Iptables);
        assert_eq!(fleet.firewall_type.to_string(), "iptables");
        assert_eq!(fleet.firewall_type.file_extension(), "iptables");
    }

    #[test]
    fn test_firewall_type_numeric_code() {
        let fleet: Firewall = serde_json::from_str(r#"{ "firewall-type": 1 }"#).unwrap();
        assert_eq!(fleet.firewall_type, RuleSystem::Iptables);
        assert_eq!(
            serde_json::to_value(&fleet).unwrap()["firewall-type"],
            "iptables"
        );

        let named: Firewall = serde_json::from_str(r#"{ "firewall-type": "iptables" }"#).unwrap();
        assert_eq!(named.firewall_type, RuleSystem::Iptables);

        assert!(serde_json::from_str::<Firewall>(r#"{ "firewall-type": 2 }"#).is_err());
        assert!(serde_json::from_str::<Firewall>(r#"{ "firewall-type": "nft" }"#).is_err());
    }

    #[test]
    fn test_depend_on_builds_nested_maps() {
        let mut network = Network::new("10.0.0.1");
        network.depend_on("db", "lan", "mysql", None);
        network.depend_on("db", "lan", "ssh", None);

        assert_eq!(network.service_dependencies["db"]["lan"].len(), 2);
    }
}
