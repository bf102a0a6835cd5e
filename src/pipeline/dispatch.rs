//! Dispatch Filter: the gate between the work queue and the worker pool.
//!
//! Every item is checked against the conversion namespace before it reaches
//! a worker. Unlike the router's local filter this check holds across
//! restarts and across routers sharing one queue. It is still only a filter:
//! two copies admitted at the same moment both reach the pool, where the
//! atomic claim lets exactly one of them convert.

use crate::model::{FileState, WorkItem};
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::worker::ConversionPool;
use crate::tracker::StateTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a queue transport error before polling again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Decision for one queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadyProcessed,
    InFlight,
    /// The state could not be read; the item is dropped rather than risk a
    /// duplicate conversion.
    StoreUnavailable,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

#[derive(Clone)]
pub struct DispatchFilter {
    tracker: StateTracker,
}

impl DispatchFilter {
    pub fn new(tracker: StateTracker) -> Self {
        Self { tracker }
    }

    pub async fn admit(&self, filename: &str) -> Admission {
        match self.tracker.state(filename).await {
            Ok(FileState::Processed) => Admission::AlreadyProcessed,
            Ok(FileState::Processing) => Admission::InFlight,
            Ok(_) => Admission::Admitted,
            Err(e) => {
                warn!(filename, error = %e, "Cannot read file state, dropping item");
                Admission::StoreUnavailable
            }
        }
    }
}

/// Consumes the work queue and hands admitted items to the pool.
pub struct Dispatcher {
    queue: Arc<dyn WorkQueue>,
    filter: DispatchFilter,
    pool: Arc<ConversionPool>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn WorkQueue>, filter: DispatchFilter, pool: Arc<ConversionPool>) -> Self {
        Self {
            queue,
            filter,
            pool,
        }
    }

    /// Filter one item and, if admitted, submit it without waiting.
    pub async fn dispatch_one(&self, item: WorkItem) -> Admission {
        let decision = self.filter.admit(&item.filename).await;
        if decision.is_admitted() {
            debug!(filename = %item.filename, "Dispatching");
            // Fire and forget: the outcome is visible in logs and store state.
            drop(self.pool.submit(item));
        } else {
            debug!(filename = %item.filename, ?decision, "Dropped at dispatch");
        }
        decision
    }

    /// Consume until `shutdown` fires.
    ///
    /// A receive in progress is allowed to finish, so an item already taken
    /// off the queue is always dispatched. Shutdown is noticed within one
    /// poll window of the queue.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(queue = self.queue.name(), workers = self.pool.size(), "Dispatcher started");
        while !shutdown.is_cancelled() {
            match self.queue.next().await {
                Ok(Some(item)) => {
                    self.dispatch_one(item).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }
}
