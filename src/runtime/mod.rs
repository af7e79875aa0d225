use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::types::{Container, ContainerEvent};

pub mod docker;
pub use docker::DockerRuntime;

/// Boundary to the container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List the containers currently running.
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError>;

    /// Stream container lifecycle events into `event_tx` until the stream
    /// ends or fails.  Returns `Ok(())` when the stream ends or the
    /// receiver goes away.
    async fn watch_events(
        &self,
        _event_tx: mpsc::Sender<ContainerEvent>,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::EventsUnsupported)
    }

    /// Release resources held by the client.
    async fn close(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
