//! Data structures used throughout the observer.
//!
//! [`Container`] is the engine-neutral view of a running container as
//! the runtime client reports it.  [`Endpoint`] is what the observer
//! derives from it and hands to subscribers.  Endpoints are immutable
//! snapshots: a change is always a replacement keyed by [`EndpointId`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Endpoints of one snapshot, keyed by their ID.
pub type EndpointMap = HashMap<EndpointId, Endpoint>;

/// Introspectable view of endpoint details.
pub type EndpointEnv = BTreeMap<String, Value>;

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
            Protocol::Sctp => f.write_str("sctp"),
        }
    }
}

/// Run state as reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    #[default]
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl RunState {
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => RunState::Created,
            "running" => RunState::Running,
            "paused" => RunState::Paused,
            "restarting" => RunState::Restarting,
            "removing" => RunState::Removing,
            "exited" => RunState::Exited,
            "dead" => RunState::Dead,
            _ => RunState::Unknown,
        }
    }
}

/// A port a container exposes, optionally published on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: Protocol,
    /// Host interface the port is published on, if any.
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
}

/// A container as seen by the runtime client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    /// Name without the leading `/` Docker adds.
    pub name: String,
    /// Image reference the container was started from (`repo:tag`).
    pub image: String,
    pub command: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    /// Network name → container IP on that network.
    pub networks: BTreeMap<String, String>,
    pub state: RunState,
}

/// A lifecycle event from the engine.  Only used as a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: String,
    pub container_id: String,
}

/// Identity of an endpoint, stable across polling cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Derives the ID from container identity and port only, so that
    /// metadata changes keep the same ID.
    pub fn new(container_id: &str, port: u16, protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => Self(format!("{}:{}", container_id, port)),
            other => Self(format!("{}:{}/{}", container_id, port, other)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata describing a container endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub name: String,
    /// Full image reference, e.g. `docker.io/library/nginx:1.17`.
    pub image: String,
    pub tag: String,
    /// Port the target is reachable on.
    pub port: u16,
    /// The other side of the mapping (host port for container ports and
    /// vice versa), when there is one.
    pub alternate_port: Option<u16>,
    pub command: Option<String>,
    pub container_id: String,
    pub host: String,
    pub transport: Protocol,
    pub labels: BTreeMap<String, String>,
}

impl ContainerDetails {
    /// Flattens the details into a key/value view.
    pub fn env(&self) -> EndpointEnv {
        let mut env = EndpointEnv::new();
        env.insert("name".into(), Value::from(self.name.clone()));
        env.insert("image".into(), Value::from(self.image.clone()));
        env.insert("tag".into(), Value::from(self.tag.clone()));
        env.insert("port".into(), Value::from(self.port));
        if let Some(alt) = self.alternate_port {
            env.insert("alternate_port".into(), Value::from(alt));
        }
        if let Some(command) = &self.command {
            env.insert("command".into(), Value::from(command.clone()));
        }
        env.insert("container_id".into(), Value::from(self.container_id.clone()));
        env.insert("host".into(), Value::from(self.host.clone()));
        env.insert("transport".into(), Value::from(self.transport.to_string()));
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        env.insert("labels".into(), Value::Object(labels));
        env
    }
}

/// A network-reachable target hosted by a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    /// `host:port`, or `[host]:port` for IPv6 hosts.
    pub target: String,
    pub details: ContainerDetails,
}
