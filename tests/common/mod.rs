//! Shared fixtures: an in-memory runtime and a recording notifier.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docker_observer::types::{PortBinding, RunState};
use docker_observer::{
    Container, ContainerEvent, ContainerRuntime, Endpoint, EndpointId, Notifier, RuntimeError,
};
use tokio::sync::{mpsc, Semaphore};

/// Runtime double.  Listing can be made to fail or to block until the
/// test releases it.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<Container>>,
    failing: AtomicBool,
    close_fails: AtomicBool,
    close_delay: Mutex<Duration>,
    gate: Option<Arc<Semaphore>>,
    events: Mutex<Option<mpsc::Receiver<ContainerEvent>>>,
    pub list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeRuntime {
    pub fn with_containers(containers: Vec<Container>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Default::default()
        }
    }

    /// Every list call waits for a permit on the returned semaphore.
    pub fn gated(containers: Vec<Container>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let runtime = Self {
            containers: Mutex::new(containers),
            gate: Some(gate.clone()),
            ..Default::default()
        };
        (runtime, gate)
    }

    /// Attaches an event stream; returns the sending half.
    pub fn with_events(self) -> (Self, mpsc::Sender<ContainerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        *self.events.lock().unwrap() = Some(rx);
        (self, tx)
    }

    pub fn set_containers(&self, containers: Vec<Container>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_close_fails(&self, fails: bool) {
        self.close_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api("connection refused".into()));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn watch_events(
        &self,
        event_tx: mpsc::Sender<ContainerEvent>,
    ) -> Result<(), RuntimeError> {
        let rx = self.events.lock().unwrap().take();
        let Some(mut rx) = rx else {
            return Err(RuntimeError::EventsUnsupported);
        };
        while let Some(event) = rx.recv().await {
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        let delay = *self.close_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api("close failed".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add(Vec<EndpointId>),
    Remove(Vec<EndpointId>),
    Change(Vec<EndpointId>),
}

/// Mirrors the endpoint set it is told about and records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    endpoints: Mutex<HashMap<EndpointId, Endpoint>>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingNotifier {
    pub fn endpoints(&self) -> HashMap<EndpointId, Endpoint> {
        self.endpoints.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

fn ids(endpoints: &[Endpoint]) -> Vec<EndpointId> {
    endpoints.iter().map(|e| e.id.clone()).collect()
}

impl Notifier for RecordingNotifier {
    fn on_add(&self, added: &[Endpoint]) {
        let mut map = self.endpoints.lock().unwrap();
        for e in added {
            map.insert(e.id.clone(), e.clone());
        }
        self.calls.lock().unwrap().push(Call::Add(ids(added)));
    }

    fn on_remove(&self, removed: &[Endpoint]) {
        let mut map = self.endpoints.lock().unwrap();
        for e in removed {
            map.remove(&e.id);
        }
        self.calls.lock().unwrap().push(Call::Remove(ids(removed)));
    }

    fn on_change(&self, changed: &[Endpoint]) {
        let mut map = self.endpoints.lock().unwrap();
        for e in changed {
            map.insert(e.id.clone(), e.clone());
        }
        self.calls.lock().unwrap().push(Call::Change(ids(changed)));
    }
}

pub fn container(id: &str, image: &str, ports: &[u16]) -> Container {
    Container {
        id: id.into(),
        name: format!("{}-name", id),
        image: image.into(),
        command: None,
        labels: BTreeMap::new(),
        ports: ports
            .iter()
            .map(|p| PortBinding {
                container_port: *p,
                ..Default::default()
            })
            .collect(),
        networks: BTreeMap::from([("bridge".to_string(), "172.17.0.2".to_string())]),
        state: RunState::Running,
    }
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
