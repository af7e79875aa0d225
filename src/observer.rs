//! The observer handle and its lifecycle.
//!
//! ```text
//! Idle ──start()──► Running ──shutdown()──► Stopping ──► Stopped
//! ```
//!
//! `start` spawns the discovery loop; `shutdown` cancels it and waits,
//! bounded by `shutdown_timeout`, for an in-flight cycle to finish so no
//! notification is delivered once shutdown returns.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ObserverError;
use crate::extract::EndpointExtractor;
use crate::notify::{Dispatcher, Notifier};
use crate::poller::{CycleStats, Poller, Schedule, Shared};
use crate::runtime::ContainerRuntime;
use crate::store::EndpointStore;
use crate::types::{Endpoint, EndpointId};

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time view of the observer for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObserverStatus {
    pub state: ObserverState,
    pub completed_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub endpoints: usize,
}

enum Lifecycle {
    Idle,
    Running {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopping,
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> ObserverState {
        match self {
            Lifecycle::Idle => ObserverState::Idle,
            Lifecycle::Running { .. } => ObserverState::Running,
            Lifecycle::Stopping => ObserverState::Stopping,
            Lifecycle::Stopped => ObserverState::Stopped,
        }
    }
}

/// Watches a container runtime and notifies subscribers of endpoint
/// changes.
pub struct DockerObserver {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    /// Flips to `true` once teardown has finished.
    stopped: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl DockerObserver {
    /// Validates `config` and builds an idle observer.
    pub fn new(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> Result<Self, ObserverError> {
        config.validate()?;
        let shared = Shared {
            runtime,
            filter: config.image_filter()?,
            extractor: EndpointExtractor {
                use_host_bindings: config.use_host_bindings,
                ignore_non_host_bindings: config.ignore_non_host_bindings,
                propagate_labels: config.propagate_labels,
            },
            store: EndpointStore::new(),
            dispatcher: Dispatcher::new(),
            refresh: Notify::new(),
            schedule: Schedule {
                poll_interval: config.poll_interval,
                cycle_deadline: config.cycle_deadline(),
                failure_threshold: config.failure_escalation_threshold.max(1),
                watch_events: config.watch_events,
            },
            stats: CycleStats::default(),
        };
        Ok(Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle::Idle),
            stopped: watch::Sender::new(false),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches the discovery loop.  Must be called from within a tokio
    /// runtime.
    pub fn start(&self) -> Result<(), ObserverError> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state() {
            ObserverState::Idle => {}
            ObserverState::Running => return Err(ObserverError::AlreadyStarted),
            ObserverState::Stopping | ObserverState::Stopped => return Err(ObserverError::Stopped),
        }
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| ObserverError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let poller = Poller::new(Arc::clone(&self.shared), cancel.clone());
        let task = handle.spawn(poller.run());
        *lifecycle = Lifecycle::Running { cancel, task };
        info!("Docker observer started");
        Ok(())
    }

    /// Stops the discovery loop and waits for it to finish.  A call made
    /// while another shutdown is in progress waits for that one; calls
    /// after that, or on an observer that never started, do nothing.
    ///
    /// The wait is bounded by `shutdown_timeout`, after which the loop
    /// task is aborted.  Aborting cannot interrupt a notifier callback
    /// that is already running, so a notifier stalled past the timeout
    /// may still be finishing its delivery after this returns.
    pub async fn shutdown(&self) -> Result<(), ObserverError> {
        let previous = {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state() {
                ObserverState::Running => {
                    Some(std::mem::replace(&mut *lifecycle, Lifecycle::Stopping))
                }
                ObserverState::Idle => {
                    *lifecycle = Lifecycle::Stopped;
                    self.stopped.send_replace(true);
                    return Ok(());
                }
                ObserverState::Stopping => None,
                ObserverState::Stopped => return Ok(()),
            }
        };
        let Some(previous) = previous else {
            // The sender lives in `self`, so this only ends on `true`.
            let _ = self.stopped.subscribe().wait_for(|done| *done).await;
            return Ok(());
        };

        if let Lifecycle::Running { cancel, mut task } = previous {
            cancel.cancel();
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Discovery loop terminated abnormally: {}", e),
                Err(_) => {
                    warn!(
                        "Discovery loop did not stop within {:?}, aborting it",
                        self.shutdown_timeout
                    );
                    task.abort();
                }
            }
        }

        if let Err(e) = self.shared.runtime.close().await {
            warn!("Failed to release container runtime client: {}", e);
        }

        *self.lifecycle() = Lifecycle::Stopped;
        self.stopped.send_replace(true);
        info!("Docker observer stopped");
        Ok(())
    }

    /// Registers a notifier.  It receives the current endpoints at once
    /// and every later change.
    pub fn subscribe(&self, notifier: Arc<dyn Notifier>) {
        self.shared
            .dispatcher
            .subscribe(&self.shared.store, notifier);
    }

    /// Requests a discovery cycle as soon as possible.
    pub fn refresh(&self) {
        self.shared.refresh.notify_one();
    }

    /// Endpoints of the last successful cycle, sorted by ID.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.store.endpoints()
    }

    pub fn endpoint(&self, id: &EndpointId) -> Option<Endpoint> {
        self.shared.store.get(id)
    }

    pub fn state(&self) -> ObserverState {
        self.lifecycle().state()
    }

    pub fn status(&self) -> ObserverStatus {
        let stats = &self.shared.stats;
        ObserverStatus {
            state: self.state(),
            completed_cycles: stats.completed.load(Ordering::SeqCst),
            failed_cycles: stats.failed.load(Ordering::SeqCst),
            consecutive_failures: stats.consecutive_failures.load(Ordering::SeqCst),
            endpoints: self.shared.store.len(),
        }
    }
}

impl Drop for DockerObserver {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Running { cancel, task } =
            std::mem::replace(lifecycle, Lifecycle::Stopped)
        {
            warn!("Docker observer dropped while running, stopping discovery loop");
            cancel.cancel();
            task.abort();
        }
    }
}
