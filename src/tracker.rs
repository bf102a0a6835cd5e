//! Per-filename state on top of the idempotency store.
//!
//! A [`StateTracker`] owns one key namespace (`<prefix>:read:` or
//! `<prefix>:state:`) and maps filenames to [`FileState`] values inside it.
//! Two trackers sharing one store give the pipeline its two independent
//! questions: "has this file been read from the input yet?" and "has it been
//! (or is it being) converted?".
//!
//! ## Failure policy
//!
//! | Operation | Store failure becomes |
//! |-----------|----------------------|
//! | [`try_claim`](StateTracker::try_claim) | `false` (not claimed: the caller must not do the work) |
//! | [`mark_processed`](StateTracker::mark_processed) | `false` (the claim stays until its TTL expires) |
//! | [`remove`](StateTracker::remove) | `false` |
//! | [`state`](StateTracker::state) / [`is_in_state`](StateTracker::is_in_state) | `Err(StoreError)`; every gate in this crate skips the item |
//!
//! Writes fail closed by returning `false`. Reads hand the error back so the
//! caller cannot mistake "store down" for "key absent".

use crate::error::StoreError;
use crate::model::FileState;
use crate::store::IdempotencyStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Filename → [`FileState`] mapping within one key namespace.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn IdempotencyStore>,
    namespace: String,
    claim_state: FileState,
    ttl: Duration,
}

impl StateTracker {
    /// Tracker for the conversion namespace: claims write `PROCESSING`.
    pub fn for_processing(
        store: Arc<dyn IdempotencyStore>,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            claim_state: FileState::Processing,
            ttl,
        }
    }

    /// Tracker for the ingestion namespace: claims write `READ`.
    pub fn for_reading(
        store: Arc<dyn IdempotencyStore>,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            claim_state: FileState::Read,
            ttl,
        }
    }

    /// Store key for `filename`.
    pub fn key(&self, filename: &str) -> String {
        format!("{}{}", self.namespace, filename)
    }

    /// State written by [`try_claim`](Self::try_claim).
    pub fn claim_state(&self) -> FileState {
        self.claim_state
    }

    /// Atomically claim `filename`.
    ///
    /// Returns `true` only to the single caller whose set-if-absent wins.
    /// Everyone else, including callers that hit a store error, gets `false`.
    pub async fn try_claim(&self, filename: &str) -> bool {
        let key = self.key(filename);
        match self
            .store
            .set_if_absent(&key, self.claim_state.as_str(), self.ttl)
            .await
        {
            Ok(won) => {
                debug!(filename, state = %self.claim_state, won, "Claim attempt");
                won
            }
            Err(e) => {
                error!(filename, error = %e, "Claim failed: store unavailable, treating as not claimed");
                false
            }
        }
    }

    /// Overwrite the record with `PROCESSED`, refreshing its TTL.
    pub async fn mark_processed(&self, filename: &str) -> bool {
        let key = self.key(filename);
        match self
            .store
            .set(&key, FileState::Processed.as_str(), self.ttl)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                error!(filename, error = %e, "Could not mark file processed; claim stays until TTL expiry");
                false
            }
        }
    }

    /// Current state of `filename`; `New` when no record exists.
    pub async fn state(&self, filename: &str) -> Result<FileState, StoreError> {
        let key = self.key(filename);
        match self.store.get(&key).await? {
            None => Ok(FileState::New),
            Some(raw) => raw.parse::<FileState>().map_err(|e| {
                warn!(filename, value = %raw, "Unrecognised state value in store");
                StoreError::Command(e)
            }),
        }
    }

    /// Whether `filename` currently holds `state`.
    pub async fn is_in_state(&self, filename: &str, state: FileState) -> Result<bool, StoreError> {
        let key = self.key(filename);
        if !self.store.exists(&key).await? {
            return Ok(state == FileState::New);
        }
        Ok(self.store.get(&key).await?.as_deref() == Some(state.as_str()))
    }

    /// Drop the record so `filename` becomes eligible again immediately.
    pub async fn remove(&self, filename: &str) -> bool {
        match self.store.delete(&self.key(filename)).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(filename, error = %e, "Could not remove state record");
                false
            }
        }
    }
}
