//! The discovery loop.
//!
//! One task owns the whole pipeline (list → filter → extract → diff →
//! dispatch) and is the only writer to the endpoint store.  Timer ticks,
//! engine events and manual refresh requests all wake the same `select!`,
//! so cycles never overlap.  Triggers that arrive while a cycle runs are
//! folded into a single follow-up cycle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use log::{debug, info, log, warn, Level};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::extract::EndpointExtractor;
use crate::filter::ImageFilter;
use crate::notify::Dispatcher;
use crate::runtime::ContainerRuntime;
use crate::store::EndpointStore;
use crate::types::{ContainerEvent, EndpointMap};

const EVENT_BUFFER: usize = 64;
const EVENT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    pub poll_interval: Duration,
    pub cycle_deadline: Duration,
    pub failure_threshold: u32,
    pub watch_events: bool,
}

/// Cycle counters readable from outside the loop.
#[derive(Debug, Default)]
pub(crate) struct CycleStats {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub consecutive_failures: AtomicU32,
}

/// State shared between the observer handle and its loop.
pub(crate) struct Shared {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub filter: ImageFilter,
    pub extractor: EndpointExtractor,
    pub store: EndpointStore,
    pub dispatcher: Dispatcher,
    pub refresh: Notify,
    pub schedule: Schedule,
    pub stats: CycleStats,
}

pub(crate) struct Poller {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(shared: Arc<Shared>, cancel: CancellationToken) -> Self {
        Self { shared, cancel }
    }

    pub async fn run(self) {
        let schedule = self.shared.schedule.clone();
        info!(
            "Starting discovery loop (interval {:?}, deadline {:?}, events {})",
            schedule.poll_interval, schedule.cycle_deadline, schedule.watch_events
        );

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
        let mut events_open = schedule.watch_events;
        let watcher = if schedule.watch_events {
            Some(tokio::spawn(watch_runtime_events(
                Arc::clone(&self.shared.runtime),
                event_tx,
                self.cancel.clone(),
            )))
        } else {
            drop(event_tx);
            None
        };

        // The first tick fires immediately, so discovery starts at once.
        let mut ticker = interval(schedule.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let triggered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Poll interval elapsed");
                    true
                }
                _ = self.shared.refresh.notified() => {
                    debug!("Refresh requested");
                    true
                }
                event = event_rx.recv(), if events_open => match event {
                    Some(event) => {
                        debug!(
                            "Container {} {}, scheduling discovery",
                            event.container_id, event.action
                        );
                        true
                    }
                    None => {
                        events_open = false;
                        false
                    }
                },
            };
            if !triggered {
                continue;
            }
            self.absorb_pending_triggers(&mut ticker, &mut event_rx);
            self.run_cycle().await;
        }

        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!("Event watcher ended abnormally: {}", e);
            }
        }
        info!("Discovery loop stopped");
    }

    /// Consumes triggers that are already pending so they share the
    /// cycle about to run.
    fn absorb_pending_triggers(
        &self,
        ticker: &mut Interval,
        event_rx: &mut mpsc::Receiver<ContainerEvent>,
    ) {
        ticker.reset();
        let _ = self.shared.refresh.notified().now_or_never();
        let mut drained = 0usize;
        while event_rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!("Coalesced {} pending container events", drained);
        }
    }

    /// Runs one cycle.  Any runtime failure aborts it before the store
    /// is touched.
    async fn run_cycle(&self) {
        let started = Instant::now();
        let deadline = self.shared.schedule.cycle_deadline;

        let listing = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Discovery cycle cancelled");
                return;
            }
            res = timeout(deadline, self.shared.runtime.list_containers()) => res,
        };
        let containers = match listing {
            Ok(Ok(containers)) => containers,
            Ok(Err(e)) => return self.record_failure(&e),
            Err(_) => return self.record_failure(&RuntimeError::Timeout(deadline)),
        };

        let current: EndpointMap = containers
            .iter()
            .filter(|c| self.shared.filter.include(c))
            .flat_map(|c| self.shared.extractor.extract(c))
            .map(|e| (e.id.clone(), e))
            .collect();
        let endpoint_count = current.len();

        let diff = self
            .shared
            .dispatcher
            .publish(&self.shared.store, current);

        self.record_success();
        debug!(
            "Discovery cycle complete: {} containers, {} endpoints, +{} -{} ~{} in {}ms",
            containers.len(),
            endpoint_count,
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len(),
            started.elapsed().as_millis()
        );
    }

    fn record_success(&self) {
        let stats = &self.shared.stats;
        stats.completed.fetch_add(1, Ordering::SeqCst);
        let previous_failures = stats.consecutive_failures.swap(0, Ordering::SeqCst);
        if previous_failures > 0 {
            info!(
                "Container discovery recovered after {} failed cycles",
                previous_failures
            );
        }
    }

    fn record_failure(&self, err: &RuntimeError) {
        let stats = &self.shared.stats;
        stats.failed.fetch_add(1, Ordering::SeqCst);
        let failures = stats.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        log!(
            failure_level(failures, self.shared.schedule.failure_threshold),
            "Container discovery failed ({} consecutive): {}. Keeping last known endpoints.",
            failures,
            err
        );
    }
}

/// Log level for the `failures`-th failed cycle in a row.
fn failure_level(failures: u32, threshold: u32) -> Level {
    if failures >= threshold {
        Level::Error
    } else {
        Level::Warn
    }
}

/// Forwards engine events to the loop, resubscribing when the stream
/// drops.  Exits when cancelled, when the loop goes away or when the
/// runtime has no event stream.
async fn watch_runtime_events(
    runtime: Arc<dyn ContainerRuntime>,
    event_tx: mpsc::Sender<ContainerEvent>,
    cancel: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            res = runtime.watch_events(event_tx.clone()) => res,
        };
        match outcome {
            Err(RuntimeError::EventsUnsupported) => {
                debug!("Runtime has no event stream, relying on polling");
                return;
            }
            Ok(()) if event_tx.is_closed() => return,
            Ok(()) => warn!(
                "Container event stream ended. Reconnecting in {:?}...",
                EVENT_RECONNECT_DELAY
            ),
            Err(e) => warn!(
                "Error in container event stream: {}. Reconnecting in {:?}...",
                e, EVENT_RECONNECT_DELAY
            ),
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(EVENT_RECONNECT_DELAY) => {}
        }
    }
}
