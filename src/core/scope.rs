//! Variable scopes visible to rule templates
//!
//! Every rule is rendered against exactly one scope record. Field names are
//! PascalCase and form the contract with rule authors:
//!
//! | Scope | Fields |
//! |-------|--------|
//! | [`ServerScope`] | `ServerName`, `Server`, `Firewall` |
//! | [`NetworkScope`] | + `NetworkName`, `Network` |
//! | [`PassiveScope`] | + `ServiceName`, `Service` |
//! | [`LinkScope`] | `ServiceName`, `Source*`, `Destination*`, `Firewall` |
//!
//! Acquirable and dependency rules share [`LinkScope`]. `Destination*` is the
//! server the rule set is generated for and `Source*` is the other end of the
//! edge: the importer for acquirable rules, the exporter for dependency rules.

use crate::core::topology::{Firewall, Network, Server, Service, Vars};
use std::collections::BTreeMap;

/// A value reachable from a template
#[derive(Clone, Copy)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Str(&'a str),
    /// Host alias lists
    Hosts(&'a [String]),
    /// Anything stored in a variable bag
    Json(&'a serde_json::Value),
    Vars(&'a Vars),
    /// Typed record or name-keyed map
    Record(&'a dyn Fields),
}

impl Value<'_> {
    /// Template truthiness: false, 0, "", empty collections and null are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Hosts(h) => !h.is_empty(),
            Value::Vars(v) => !v.is_empty(),
            Value::Record(record) => !record.is_empty(),
            Value::Json(json) => match json {
                serde_json::Value::Null => false,
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                serde_json::Value::String(s) => !s.is_empty(),
                serde_json::Value::Array(a) => !a.is_empty(),
                serde_json::Value::Object(o) => !o.is_empty(),
            },
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Hosts(_) => "host list",
            Value::Vars(_) => "vars",
            Value::Record(_) => "record",
            Value::Json(json) => match json {
                serde_json::Value::Null => "nil",
                serde_json::Value::Bool(_) => "bool",
                serde_json::Value::Number(_) => "number",
                serde_json::Value::String(_) => "string",
                serde_json::Value::Array(_) => "array",
                serde_json::Value::Object(_) => "object",
            },
        }
    }
}

/// Named field access for template lookups
///
/// Returning `None` means the field doesn't exist, which fails rendering.
pub trait Fields {
    fn field(&self, name: &str) -> Option<Value<'_>>;

    /// Empty maps are falsy in `if`; typed records never are.
    fn is_empty(&self) -> bool {
        false
    }
}

impl<T: Fields> Fields for BTreeMap<String, T> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        self.get(name).map(|v| Value::Record(v as &dyn Fields))
    }

    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

impl Fields for Firewall {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "Servers" => Some(Value::Record(&self.servers)),
            "FirewallType" => Some(Value::Str(self.firewall_type.as_ref())),
            "Vars" => Some(Value::Vars(&self.vars)),
            _ => None,
        }
    }
}

impl Fields for Server {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "Hostname" => Some(Value::Str(&self.hostname)),
            "Networks" => Some(Value::Record(&self.networks)),
            "Vars" => Some(Value::Vars(&self.vars)),
            _ => None,
        }
    }
}

impl Fields for Network {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "IP" => Some(Value::Str(&self.ip)),
            "Hosts" => Some(Value::Hosts(&self.hosts)),
            "ServicesPassive" => Some(Value::Record(&self.services_passive)),
            "ServicesAcquirable" => Some(Value::Record(&self.services_acquirable)),
            "Vars" => Some(Value::Vars(&self.vars)),
            _ => None,
        }
    }
}

impl Fields for Service {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "Port" => Some(Value::Int(i64::from(self.port))),
            "Vars" => Some(Value::Vars(&self.vars)),
            _ => None,
        }
    }
}

/// Scope for global and server rules
#[derive(Debug, Clone, Copy)]
pub struct ServerScope<'a> {
    pub server_name: &'a str,
    pub server: &'a Server,
    pub firewall: &'a Firewall,
}

impl Fields for ServerScope<'_> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "ServerName" => Some(Value::Str(self.server_name)),
            "Server" => Some(Value::Record(self.server)),
            "Firewall" => Some(Value::Record(self.firewall)),
            _ => None,
        }
    }
}

/// Scope for network before/after rules
#[derive(Debug, Clone, Copy)]
pub struct NetworkScope<'a> {
    pub server_name: &'a str,
    pub server: &'a Server,
    pub network_name: &'a str,
    pub network: &'a Network,
    pub firewall: &'a Firewall,
}

impl<'a> NetworkScope<'a> {
    pub fn service(self, service_name: &'a str, service: &'a Service) -> PassiveScope<'a> {
        PassiveScope {
            network: self,
            service_name,
            service,
        }
    }
}

impl Fields for NetworkScope<'_> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "ServerName" => Some(Value::Str(self.server_name)),
            "Server" => Some(Value::Record(self.server)),
            "NetworkName" => Some(Value::Str(self.network_name)),
            "Network" => Some(Value::Record(self.network)),
            "Firewall" => Some(Value::Record(self.firewall)),
            _ => None,
        }
    }
}

/// Scope for passive service rules
#[derive(Debug, Clone, Copy)]
pub struct PassiveScope<'a> {
    pub network: NetworkScope<'a>,
    pub service_name: &'a str,
    pub service: &'a Service,
}

impl Fields for PassiveScope<'_> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "ServiceName" => Some(Value::Str(self.service_name)),
            "Service" => Some(Value::Record(self.service)),
            _ => self.network.field(name),
        }
    }
}

/// Scope for rules produced by a dependency edge, on either end of it
#[derive(Debug, Clone, Copy)]
pub struct LinkScope<'a> {
    /// Same on both ends of the edge
    pub service_name: &'a str,
    pub source_server_name: &'a str,
    pub source_server: &'a Server,
    pub source_network_name: &'a str,
    pub source_network: &'a Network,
    /// Absent when an importer declares the dependency without a local service
    pub source_service: Option<&'a Service>,
    pub destination_server_name: &'a str,
    pub destination_server: &'a Server,
    pub destination_network_name: &'a str,
    pub destination_network: &'a Network,
    pub destination_service: &'a Service,
    pub firewall: &'a Firewall,
}

/// Scope for rules allowing an importer into one of our acquirable services
pub type AcquirableScope<'a> = LinkScope<'a>;

/// Scope for local rules triggered by one of our own dependencies
pub type DependencyScope<'a> = LinkScope<'a>;

impl LinkScope<'_> {
    /// Source port if the source service declares one
    pub fn source_port(&self) -> Option<u16> {
        self.source_service.map(|s| s.port).filter(|&port| port > 0)
    }
}

impl Fields for LinkScope<'_> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "ServiceName" => Some(Value::Str(self.service_name)),
            "SourceServerName" => Some(Value::Str(self.source_server_name)),
            "SourceServer" => Some(Value::Record(self.source_server)),
            "SourceNetworkName" => Some(Value::Str(self.source_network_name)),
            "SourceNetwork" => Some(Value::Record(self.source_network)),
            "SourceService" => Some(
                self.source_service
                    .map_or(Value::Null, |s| Value::Record(s)),
            ),
            "DestinationServerName" => Some(Value::Str(self.destination_server_name)),
            "DestinationServer" => Some(Value::Record(self.destination_server)),
            "DestinationNetworkName" => Some(Value::Str(self.destination_network_name)),
            "DestinationNetwork" => Some(Value::Record(self.destination_network)),
            "DestinationService" => Some(Value::Record(self.destination_service)),
            "Firewall" => Some(Value::Record(self.firewall)),
            _ => None,
        }
    }
}
