//! Error types for the docx2pdf pipeline.
//!
//! Two distinct error types reflect two distinct failure modes, plus one
//! type per external boundary:
//!
//! * [`PipelineError`] — **Fatal**: the pipeline cannot start or stop cleanly
//!   (bad configuration, scratch directory unusable, store unreachable at
//!   startup). Returned from [`crate::service::Pipeline::start`] and friends.
//!
//! * [`TaskError`] — **Non-fatal**: one work item failed (scratch I/O,
//!   converter crash). Logged by the worker pool; every other in-flight task
//!   carries on.
//!
//! * [`StoreError`] — transport failure of the idempotency store. Store calls
//!   return it instead of panicking so [`crate::tracker::StateTracker`] can
//!   apply a fail-closed policy.
//!
//! * [`ConvertError`] — the converter boundary's distinguished failure.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned while starting, running or stopping the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// The input directory is missing or unreadable.
    #[error("Cannot read input directory '{path}': {source}")]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or remove the scratch directory.
    #[error("Scratch directory '{path}' unusable: {source}")]
    ScratchDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create the output directory.
    #[error("Cannot create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not load or append to the persisted seen-file list.
    #[error("Seen-file list '{path}' unusable: {source}")]
    SeenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The idempotency store could not be reached.
    #[error("Idempotency store unavailable: {0}")]
    Store(#[from] StoreError),

    /// The work queue is closed or its transport failed.
    #[error("Work queue '{queue}' failed: {reason}")]
    Queue { queue: String, reason: String },

    /// The external converter could not be set up.
    #[error("Converter unavailable: {0}")]
    ConverterUnavailable(String),
}

/// A non-fatal error for a single work item.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The filename would escape the output directory or is empty.
    #[error("Invalid filename '{filename}': {reason}")]
    InvalidFilename { filename: String, reason: &'static str },

    /// Writing or removing the scratch copy failed.
    #[error("Scratch file I/O failed for '{filename}': {source}")]
    Scratch {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter rejected or crashed on this document.
    #[error("Conversion of '{filename}' failed: {source}")]
    Convert {
        filename: String,
        #[source]
        source: ConvertError,
    },

    /// The worker task panicked or was aborted.
    #[error("Worker task for '{filename}' did not complete: {detail}")]
    Aborted { filename: String, detail: String },
}

/// Transport-level failures of the idempotency store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Could not open or re-establish a connection.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store answered with an error.
    #[error("store command error: {0}")]
    Command(String),

    /// The store was explicitly closed.
    #[error("store is closed")]
    Closed,
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Failures reported by the external converter.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter process could not be spawned.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The converter exited unsuccessfully.
    #[error("converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The converter reported success but produced no file.
    #[error("converter produced no output at '{expected}'")]
    MissingOutput { expected: PathBuf },

    /// The converted file could not be moved into the output directory.
    #[error("could not move output to '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The conversion exceeded the configured timeout and was killed.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },
}
