use super::ContainerRuntime;
use crate::error::{ConfigError, RuntimeError};
use crate::types::{Container, ContainerEvent, PortBinding, Protocol, RunState};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerSummary, EventMessage, PortTypeEnum};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;

/// Container actions that can change the endpoint set.
const WATCHED_ACTIONS: &[&str] = &[
    "start", "die", "stop", "kill", "pause", "unpause", "destroy", "rename", "update",
];

/// Where the Docker engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAddress {
    Unix(String),
    Http(String),
}

impl EngineAddress {
    pub fn parse(endpoint: &str) -> Result<Self, ConfigError> {
        if let Some(path) = endpoint.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
            }
            return Ok(EngineAddress::Unix(path.to_string()));
        }
        let host = endpoint
            .strip_prefix("tcp://")
            .or_else(|| endpoint.strip_prefix("http://"));
        match host {
            Some(host) if !host.is_empty() => Ok(EngineAddress::Http(format!("http://{}", host))),
            _ => Err(ConfigError::InvalidEndpoint(endpoint.to_string())),
        }
    }
}

/// Docker engine client built on bollard.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Builds a client for `endpoint`.  No request is made until the
    /// first cycle.
    pub fn connect(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let timeout_secs = timeout.as_secs().max(1);
        let docker = match EngineAddress::parse(endpoint)? {
            EngineAddress::Unix(path) => {
                Docker::connect_with_unix(&path, timeout_secs, API_DEFAULT_VERSION)?
            }
            EngineAddress::Http(addr) => {
                Docker::connect_with_http(&addr, timeout_secs, API_DEFAULT_VERSION)?
            }
        };
        info!("Using Docker engine at {}", endpoint);
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(opts)).await?;
        Ok(summaries.into_iter().filter_map(container_from_summary).collect())
    }

    async fn watch_events(
        &self,
        event_tx: mpsc::Sender<ContainerEvent>,
    ) -> Result<(), RuntimeError> {
        let opts = EventsOptions::<String> {
            filters: HashMap::from([
                ("type".to_string(), vec!["container".to_string()]),
                (
                    "event".to_string(),
                    WATCHED_ACTIONS.iter().map(|a| a.to_string()).collect(),
                ),
            ]),
            ..Default::default()
        };

        let mut stream = self.docker.events(Some(opts));
        debug!("Listening for Docker events...");
        while let Some(msg) = stream.next().await {
            let Some(event) = event_from_message(msg?) else {
                continue;
            };
            debug!("Container event: {} for {}", event.action, event.container_id);
            if event_tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

fn container_from_summary(summary: ContainerSummary) -> Option<Container> {
    let id = summary.id.filter(|id| !id.is_empty())?;
    let name = summary
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.clone());

    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortBinding {
            container_port: p.private_port,
            protocol: match p.typ {
                Some(PortTypeEnum::UDP) => Protocol::Udp,
                Some(PortTypeEnum::SCTP) => Protocol::Sctp,
                _ => Protocol::Tcp,
            },
            host_ip: p.ip.filter(|ip| !ip.is_empty()),
            host_port: p.public_port.filter(|port| *port != 0),
        })
        .collect();

    let networks = summary
        .network_settings
        .and_then(|s| s.networks)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, settings)| {
            settings
                .ip_address
                .filter(|ip| !ip.is_empty())
                .or(settings.global_ipv6_address.filter(|ip| !ip.is_empty()))
                .map(|ip| (name, ip))
        })
        .collect::<BTreeMap<_, _>>();

    Some(Container {
        id,
        name,
        image: summary.image.unwrap_or_default(),
        command: summary.command.filter(|c| !c.is_empty()),
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
        ports,
        networks,
        state: summary
            .state
            .as_deref()
            .map(RunState::parse)
            .unwrap_or(RunState::Unknown),
    })
}

fn event_from_message(msg: EventMessage) -> Option<ContainerEvent> {
    let action = msg.action.filter(|a| !a.is_empty())?;
    let container_id = msg.actor.and_then(|a| a.id).unwrap_or_default();
    Some(ContainerEvent {
        action,
        container_id,
    })
}
