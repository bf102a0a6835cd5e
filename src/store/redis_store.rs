//! Redis-backed [`IdempotencyStore`].
//!
//! One [`ConnectionManager`] is opened per process and cloned into each call.
//! The manager multiplexes commands over a shared connection and reconnects
//! on its own after a drop, which is the pooling behaviour the pipeline
//! needs without a per-call connect.
//!
//! Claims use `SET key value NX PX ttl`, a single atomic command; there is no
//! `SETNX` + `EXPIRE` pair that could leave an immortal key behind.

use super::IdempotencyStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Redis implementation of the idempotency store.
pub struct RedisStore {
    endpoint: String,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Open the connection and verify it with `PING`.
    ///
    /// # Arguments
    /// * `url` — Redis URL, e.g. `redis://127.0.0.1:6379/0`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let endpoint = client.get_connection_info().addr.to_string();

        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(format!("{endpoint}: {e}")))?;

        let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
        info!(endpoint = %endpoint, reply = %pong, "Idempotency store connected");

        Ok(Self {
            endpoint,
            conn: RwLock::new(Some(manager)),
        })
    }

    /// Address of the Redis server, without credentials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn.read().await.clone().ok_or(StoreError::Closed)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl IdempotencyStore for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        // Nil reply means the key already existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        debug!(key, value, won = reply.is_some(), "SET NX");
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        debug!(key, value, "SET");
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let n: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let n: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(n == 1)
    }

    async fn close(&self) {
        if self.conn.write().await.take().is_some() {
            info!(endpoint = %self.endpoint, "Idempotency store closed");
        } else {
            warn!(endpoint = %self.endpoint, "Idempotency store already closed");
        }
    }
}
