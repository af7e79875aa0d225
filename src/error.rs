//! Error types for the observer.
//!
//! Configuration problems are fatal and surface before the observer
//! starts.  Runtime problems are transient: the poller logs them and
//! waits for the next trigger.

use std::time::Duration;

use thiserror::Error;

/// Rejected configuration.  Raised at construction, never per cycle.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid glob pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("`{0}` must be greater than zero")]
    NonPositiveDuration(&'static str),

    #[error("unsupported engine endpoint `{0}`")]
    InvalidEndpoint(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

/// Failure talking to the container engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),

    #[error("runtime API error: {0}")]
    Api(String),

    #[error("runtime does not provide a lifecycle event stream")]
    EventsUnsupported,
}

/// Errors returned by the observer's public surface.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("observer is already running")]
    AlreadyStarted,

    #[error("observer has been shut down")]
    Stopped,

    #[error("observer must be started from within a tokio runtime")]
    NoRuntime,
}
