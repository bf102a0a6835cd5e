//! Broker boundary: a named queue of [`WorkItem`]s.
//!
//! The Ingestion Router publishes, the dispatcher consumes. Two transports:
//!
//! * [`LocalQueue`] — bounded tokio channel; one process, no durability.
//! * [`RedisQueue`] — a Redis list (`RPUSH` / `BLPOP`) so several processes
//!   can share one queue. Each entry is a JSON envelope
//!   `{"filename": "...", "payload": "<base64>"}`.
//!
//! Delivery is at-least-once at best; duplicates are expected and are the
//! Dispatch Filter's job to absorb.

use crate::error::PipelineError;
use crate::model::WorkItem;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// How long one `BLPOP` waits before the consumer re-checks for shutdown.
const POP_TIMEOUT_SECS: u64 = 1;

/// Same window for the in-process queue.
const POLL_WINDOW: Duration = Duration::from_secs(POP_TIMEOUT_SECS);

/// A named queue carrying work items.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, item: WorkItem) -> Result<(), PipelineError>;

    /// Wait for the next item.
    ///
    /// `Ok(None)` means nothing arrived within the transport's poll window
    /// (or the queue is closed); callers loop and re-check for shutdown.
    async fn next(&self) -> Result<Option<WorkItem>, PipelineError>;
}

// ── In-process queue ─────────────────────────────────────────────────────────

/// Bounded in-process queue.
pub struct LocalQueue {
    name: String,
    tx: mpsc::Sender<WorkItem>,
    rx: Mutex<mpsc::Receiver<WorkItem>>,
}

impl LocalQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl WorkQueue for LocalQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, item: WorkItem) -> Result<(), PipelineError> {
        debug!(queue = %self.name, filename = %item.filename, "Publishing");
        self.tx.send(item).await.map_err(|_| PipelineError::Queue {
            queue: self.name.clone(),
            reason: "receiver dropped".into(),
        })
    }

    async fn next(&self) -> Result<Option<WorkItem>, PipelineError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(POLL_WINDOW, rx.recv()).await {
            Ok(item) => Ok(item),
            Err(_) => Ok(None),
        }
    }
}

// ── Redis list queue ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    filename: String,
    payload: String,
}

impl Envelope {
    fn encode(item: &WorkItem) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            filename: item.filename.clone(),
            payload: STANDARD.encode(&item.payload),
        })
    }

    fn decode(raw: &str) -> Result<WorkItem, String> {
        let env: Envelope = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let payload = STANDARD.decode(env.payload).map_err(|e| e.to_string())?;
        Ok(WorkItem::new(env.filename, payload))
    }
}

/// Queue shared between processes through a Redis list.
///
/// Publishing goes through a [`ConnectionManager`]; consuming uses its own
/// connection because `BLPOP` would stall every other command multiplexed
/// on a shared one.
pub struct RedisQueue {
    name: String,
    publisher: ConnectionManager,
    consumer: Mutex<MultiplexedConnection>,
}

impl RedisQueue {
    pub async fn connect(url: &str, name: impl Into<String>) -> Result<Self, PipelineError> {
        let name = name.into();
        let queue_err = |reason: String| PipelineError::Queue {
            queue: name.clone(),
            reason,
        };

        let client = redis::Client::open(url).map_err(|e| queue_err(e.to_string()))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| queue_err(e.to_string()))?;
        let consumer = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| queue_err(e.to_string()))?;

        info!(queue = %name, "Redis queue connected");
        Ok(Self {
            name,
            publisher,
            consumer: Mutex::new(consumer),
        })
    }

    fn err(&self, reason: impl ToString) -> PipelineError {
        PipelineError::Queue {
            queue: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, item: WorkItem) -> Result<(), PipelineError> {
        let body = Envelope::encode(&item).map_err(|e| self.err(e))?;
        let mut conn = self.publisher.clone();
        let _len: i64 = redis::cmd("RPUSH")
            .arg(&self.name)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.err(e))?;
        debug!(queue = %self.name, filename = %item.filename, "Published");
        Ok(())
    }

    async fn next(&self) -> Result<Option<WorkItem>, PipelineError> {
        let mut conn = self.consumer.lock().await;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.name)
            .arg(POP_TIMEOUT_SECS)
            .query_async(&mut *conn)
            .await
            .map_err(|e| self.err(e))?;

        let Some((_, raw)) = popped else {
            return Ok(None);
        };

        match Envelope::decode(&raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                // Poison messages are dropped so they cannot wedge the consumer.
                warn!(queue = %self.name, error = %e, "Discarding malformed queue entry");
                Ok(None)
            }
        }
    }
}
