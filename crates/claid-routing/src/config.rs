/// Host, Module and router configuration.
///
/// The configuration layer hands the routing layer a full description of
/// every Host in the deployment (who serves, who connects to whom) and of
/// every Module with its channel bindings. Every Host reads the same file;
/// the routing table derived from it is what differs per Host.
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RoutingError;
use crate::queue::DEFAULT_POLL_INTERVAL;

// ── Hosts ──────────────────────────────────────────────────────────────

/// One participant of the routing topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescription {
    pub hostname: String,
    /// Address this host accepts connections on. `None` for pure clients.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub server_address: Option<String>,
    /// Name of the host this one connects to. `None` only for the tree root.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub connect_to: Option<String>,
}

impl HostDescription {
    /// A server nobody is above: the root of the routing tree.
    pub fn root(hostname: impl Into<String>, server_address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            server_address: non_empty(server_address.into()),
            connect_to: None,
        }
    }

    /// A server that itself connects upward to `connect_to`.
    pub fn server(
        hostname: impl Into<String>,
        server_address: impl Into<String>,
        connect_to: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            server_address: non_empty(server_address.into()),
            connect_to: non_empty(connect_to.into()),
        }
    }

    /// A leaf host that only connects to `connect_to`.
    pub fn client(hostname: impl Into<String>, connect_to: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            server_address: None,
            connect_to: non_empty(connect_to.into()),
        }
    }

    pub fn is_server(&self) -> bool {
        self.server_address.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.connect_to.is_none()
    }

    /// Short role label used in reload diagnostics.
    pub(crate) fn role(&self) -> String {
        match (&self.server_address, &self.connect_to) {
            (Some(addr), Some(up)) => format!("server at {addr} connected to {up}"),
            (Some(addr), None) => format!("root server at {addr}"),
            (None, Some(up)) => format!("client of {up}"),
            (None, None) => "unconnected client".to_string(),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(non_empty))
}

/// Insertion-ordered set of host descriptions, keyed by hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<HostDescription>", into = "Vec<HostDescription>")]
pub struct HostDescriptions {
    hosts: Vec<HostDescription>,
    index: HashMap<String, usize>,
}

impl HostDescriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host. A hostname may appear only once.
    pub fn insert(&mut self, host: HostDescription) -> Result<(), RoutingError> {
        if self.index.contains_key(&host.hostname) {
            return Err(RoutingError::DuplicateHost {
                host: host.hostname,
            });
        }
        self.index.insert(host.hostname.clone(), self.hosts.len());
        self.hosts.push(host);
        Ok(())
    }

    pub fn get(&self, hostname: &str) -> Option<&HostDescription> {
        self.index.get(hostname).map(|&i| &self.hosts[i])
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.index.contains_key(hostname)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostDescription> {
        self.hosts.iter()
    }

    pub fn as_slice(&self) -> &[HostDescription] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Check that `other` describes the same hosts in the same roles.
    ///
    /// Hosts cannot be added, removed, or switch between server and client
    /// across a reload. Addresses and the server a Host connects to may
    /// change; the tree is rebuilt from the new descriptions.
    pub fn ensure_same_topology(&self, other: &HostDescriptions) -> Result<(), RoutingError> {
        for host in &self.hosts {
            match other.get(&host.hostname) {
                None => {
                    return Err(RoutingError::TopologyChanged {
                        host: host.hostname.clone(),
                        before: host.role(),
                        after: "removed".into(),
                    })
                }
                Some(new) if new.is_server() != host.is_server() => {
                    return Err(RoutingError::TopologyChanged {
                        host: host.hostname.clone(),
                        before: host.role(),
                        after: new.role(),
                    })
                }
                Some(_) => {}
            }
        }
        if let Some(added) = other.iter().find(|h| !self.contains(&h.hostname)) {
            return Err(RoutingError::TopologyChanged {
                host: added.hostname.clone(),
                before: "absent".into(),
                after: added.role(),
            });
        }
        Ok(())
    }
}

impl TryFrom<Vec<HostDescription>> for HostDescriptions {
    type Error = RoutingError;

    fn try_from(hosts: Vec<HostDescription>) -> Result<Self, Self::Error> {
        let mut descriptions = HostDescriptions::new();
        for host in hosts {
            descriptions.insert(host)?;
        }
        Ok(descriptions)
    }
}

impl From<HostDescriptions> for Vec<HostDescription> {
    fn from(descriptions: HostDescriptions) -> Self {
        descriptions.hosts
    }
}

impl<'a> IntoIterator for &'a HostDescriptions {
    type Item = &'a HostDescription;
    type IntoIter = std::slice::Iter<'a, HostDescription>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}

// ── Modules ────────────────────────────────────────────────────────────

/// A Module and the channels it binds.
///
/// `input_channels` and `output_channels` map the Module-local channel name
/// to the canonical connection name shared by every party on that channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescription {
    pub id: String,
    pub class: String,
    pub host: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub input_channels: BTreeMap<String, String>,
    #[serde(default)]
    pub output_channels: BTreeMap<String, String>,
}

impl ModuleDescription {
    pub fn new(id: impl Into<String>, class: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            host: host.into(),
            properties: BTreeMap::new(),
            input_channels: BTreeMap::new(),
            output_channels: BTreeMap::new(),
        }
    }

    /// Subscribe to `connection` under the local name `channel`.
    pub fn input(mut self, channel: impl Into<String>, connection: impl Into<String>) -> Self {
        self.input_channels.insert(channel.into(), connection.into());
        self
    }

    /// Publish to `connection` under the local name `channel`.
    pub fn output(mut self, channel: impl Into<String>, connection: impl Into<String>) -> Self {
        self.output_channels.insert(channel.into(), connection.into());
        self
    }
}

// ── Whole deployment ───────────────────────────────────────────────────

/// Full Host/Module description set of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub hosts: HostDescriptions,
    #[serde(default)]
    pub modules: Vec<ModuleDescription>,
}

impl Configuration {
    pub fn from_json_str(json: &str) -> Result<Self, RoutingError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoutingError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RoutingError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Modules that run on `host`.
    pub fn modules_for_host<'a>(
        &'a self,
        host: &'a str,
    ) -> impl Iterator<Item = &'a ModuleDescription> + 'a {
        self.modules.iter().filter(move |m| m.host == host)
    }
}

// ── Router tuning ──────────────────────────────────────────────────────

/// Configuration for a [`MasterRouter`](crate::MasterRouter).
///
/// ```rust
/// use std::time::Duration;
/// use claid_routing::RouterConfig;
///
/// let config = RouterConfig::new()
///     .dispatch_thread_name("router-phone")
///     .forwarder_poll_interval(Duration::from_millis(10));
/// ```
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub(crate) dispatch_thread_name: String,
    /// How often idle queue forwarders re-check for a stop request.
    pub(crate) forwarder_poll_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            dispatch_thread_name: "claid-master-router".into(),
            forwarder_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Name of the dispatch loop thread (default: `claid-master-router`).
    pub fn dispatch_thread_name(mut self, name: impl Into<String>) -> Self {
        self.dispatch_thread_name = name.into();
        self
    }

    /// Stop-flag poll interval of the inbound queue forwarders (default: 50 ms).
    pub fn forwarder_poll_interval(mut self, interval: Duration) -> Self {
        self.forwarder_poll_interval = interval;
        self
    }
}
