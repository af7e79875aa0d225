//! Turns containers into endpoints.

use std::collections::HashSet;

use log::debug;

use crate::types::{Container, ContainerDetails, Endpoint, EndpointId, PortBinding, RunState};

const LOOPBACK_V4: &str = "127.0.0.1";
const LOOPBACK_V6: &str = "::1";

/// Derives one endpoint per relevant port mapping of a container.
#[derive(Debug, Clone, Default)]
pub struct EndpointExtractor {
    /// Surface host-published ports instead of container ports.
    pub use_host_bindings: bool,
    /// Drop ports that are not published on the host.
    pub ignore_non_host_bindings: bool,
    /// Copy container labels into the endpoint details.
    pub propagate_labels: bool,
}

impl EndpointExtractor {
    pub fn extract(&self, container: &Container) -> Vec<Endpoint> {
        if container.state != RunState::Running {
            debug!(
                "Skipping container {} in state {:?}",
                container.id, container.state
            );
            return Vec::new();
        }

        let (_, tag) = split_image_ref(&container.image);
        let container_ip = container_ip(container);
        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(container.ports.len());

        for binding in &container.ports {
            if binding.container_port == 0 {
                continue;
            }
            let Some((host, port, alternate_port)) = self.resolve(binding, &container_ip) else {
                continue;
            };

            let id = EndpointId::new(&container.id, binding.container_port, binding.protocol);
            if !seen.insert(id.clone()) {
                // Docker lists a published port once per host address family.
                continue;
            }

            endpoints.push(Endpoint {
                id,
                target: format_target(&host, port),
                details: ContainerDetails {
                    name: container.name.clone(),
                    image: container.image.clone(),
                    tag: tag.clone(),
                    port,
                    alternate_port,
                    command: container.command.clone(),
                    container_id: container.id.clone(),
                    host,
                    transport: binding.protocol,
                    labels: if self.propagate_labels {
                        container.labels.clone()
                    } else {
                        Default::default()
                    },
                },
            });
        }

        endpoints
    }

    /// Picks `(host, port, alternate_port)` for a binding, or `None` when
    /// the binding is not surfaced.
    fn resolve(
        &self,
        binding: &PortBinding,
        container_ip: &str,
    ) -> Option<(String, u16, Option<u16>)> {
        match (binding.host_port, self.use_host_bindings) {
            (Some(host_port), true) => Some((
                host_address(binding.host_ip.as_deref()),
                host_port,
                Some(binding.container_port),
            )),
            (None, _) if self.ignore_non_host_bindings => None,
            (host_port, _) => Some((container_ip.to_string(), binding.container_port, host_port)),
        }
    }
}

/// The container's address on its first network, by network name.
fn container_ip(container: &Container) -> String {
    container
        .networks
        .values()
        .find(|ip| !ip.is_empty())
        .cloned()
        .unwrap_or_else(|| LOOPBACK_V4.to_string())
}

/// Maps wildcard bind addresses to loopback.
fn host_address(host_ip: Option<&str>) -> String {
    match host_ip {
        None | Some("") | Some("0.0.0.0") => LOOPBACK_V4.to_string(),
        Some("::") => LOOPBACK_V6.to_string(),
        Some(ip) => ip.to_string(),
    }
}

fn format_target(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Splits an image reference into repository and tag.  Digests are
/// dropped; a missing tag means `latest`.
pub fn split_image_ref(image: &str) -> (String, String) {
    let without_digest = image.split('@').next().unwrap_or(image);
    let name_start = without_digest.rfind('/').map_or(0, |i| i + 1);
    match without_digest[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (
                without_digest[..split].to_string(),
                without_digest[split + 1..].to_string(),
            )
        }
        None => (without_digest.to_string(), "latest".to_string()),
    }
}
