//! Service discovery for containers running on a Docker engine.
//!
//! A [`DockerObserver`] polls the engine on a timer and on lifecycle
//! events, turns running containers into [`Endpoint`]s and notifies
//! registered [`Notifier`]s of what was added, removed or changed since
//! the previous cycle.

pub mod config;
pub mod error;
pub mod extract;
pub mod filter;
pub mod notify;
pub mod observer;
mod poller;
pub mod runtime;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, ObserverError, RuntimeError};
pub use notify::{LoggingNotifier, Notifier};
pub use observer::{DockerObserver, ObserverState, ObserverStatus};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use store::Diff;
pub use types::{Container, ContainerDetails, ContainerEvent, Endpoint, EndpointId};
