//! Heartbeat monitoring for registered services.
//!
//! Each armed service gets one periodic probe task. Tasks are keyed by
//! service name and stamped with a generation number so a failure report can
//! be matched against the heartbeat that produced it: if the service was
//! re-registered in the meantime, the stale report no longer matches and is
//! ignored by the consumer.

use crate::checkers::HealthChecker;
use crate::types::{HealthCheckResult, ProbeTarget};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Report emitted by a heartbeat whose probe failed. Sent at most once per
/// generation; the task stops probing right after sending it.
#[derive(Debug, Clone)]
pub struct HeartbeatFailure {
    pub name: String,
    pub generation: u64,
    pub result: HealthCheckResult,
}

struct HeartbeatHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns every running heartbeat.
pub struct HeartbeatMonitor {
    checker: Arc<dyn HealthChecker>,
    interval: Duration,
    handles: DashMap<String, HeartbeatHandle>,
    next_generation: AtomicU64,
    failure_tx: mpsc::Sender<HeartbeatFailure>,
}

impl HeartbeatMonitor {
    /// Create a monitor and the receiving end of its failure channel
    pub fn new(
        checker: Arc<dyn HealthChecker>,
        interval: Duration,
        channel_size: usize,
    ) -> (Self, mpsc::Receiver<HeartbeatFailure>) {
        let (failure_tx, failure_rx) = mpsc::channel(channel_size.max(1));
        let monitor = Self {
            checker,
            interval,
            handles: DashMap::new(),
            next_generation: AtomicU64::new(0),
            failure_tx,
        };
        (monitor, failure_rx)
    }

    /// Probe interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start a heartbeat for `name`, cancelling any heartbeat it replaces.
    /// Returns the new generation.
    pub fn arm(&self, name: &str, target: ProbeTarget) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let task = tokio::spawn(run_heartbeat(
            self.checker.clone(),
            self.interval,
            name.to_string(),
            generation,
            target,
            self.failure_tx.clone(),
        ));

        let previous = self
            .handles
            .insert(name.to_string(), HeartbeatHandle { generation, task });

        if let Some(previous) = previous {
            debug!(
                service = name,
                old_generation = previous.generation,
                generation,
                "Replaced heartbeat"
            );
        } else {
            debug!(service = name, generation, "Armed heartbeat");
        }

        generation
    }

    /// Cancel the heartbeat for `name`. Returns whether one was armed.
    pub fn disarm(&self, name: &str) -> bool {
        let removed = self.handles.remove(name).is_some();
        if removed {
            debug!(service = name, "Disarmed heartbeat");
        }
        removed
    }

    /// Cancel the heartbeat for `name` only if it is still `generation`.
    pub fn disarm_if(&self, name: &str, generation: u64) -> bool {
        self.handles
            .remove_if(name, |_, handle| handle.generation == generation)
            .is_some()
    }

    /// Generation currently armed for `name`
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.handles.get(name).map(|handle| handle.generation)
    }

    pub fn is_armed(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Number of armed heartbeats
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every heartbeat
    pub fn shutdown(&self) {
        let count = self.handles.len();
        self.handles.clear();
        info!(count, "Heartbeat monitor stopped");
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.handles.clear();
    }
}

async fn run_heartbeat(
    checker: Arc<dyn HealthChecker>,
    period: Duration,
    name: String,
    generation: u64,
    target: ProbeTarget,
    failure_tx: mpsc::Sender<HeartbeatFailure>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip first immediate tick

    loop {
        ticker.tick().await;

        let result = checker.check(&target).await;
        if result.is_healthy() {
            debug!(
                service = %name,
                generation,
                duration_ms = result.duration.as_millis(),
                "Heartbeat passed"
            );
            continue;
        }

        warn!(
            service = %name,
            generation,
            status = %result.status,
            cause = result.message.as_deref().unwrap_or("unknown"),
            "Heartbeat failed"
        );

        let failure = HeartbeatFailure {
            name,
            generation,
            result,
        };
        if failure_tx.send(failure).await.is_err() {
            debug!("Heartbeat failure channel closed");
        }
        break;
    }
}
