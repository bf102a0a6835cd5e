//! # docx2pdf-pipeline
//!
//! Watch a directory for Word documents and convert each one to PDF exactly
//! once, however often it is observed or redelivered.
//!
//! ## Why this crate?
//!
//! The input directory is never cleaned up, the queue may redeliver, and
//! several instances may watch the same inbox. Exactly-once output therefore
//! cannot come from any single process. It comes from a shared Redis store
//! and its atomic `SET NX`: one claim per filename per TTL window, whoever
//! asks.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input/*.docx
//!  │
//!  ├─ 1. Ingest    rescan, local seen-filter, optional shared "read" claim
//!  ├─ 2. Queue     in-process channel or Redis list
//!  ├─ 3. Dispatch  drop anything PROCESSING or PROCESSED
//!  ├─ 4. Convert   bounded pool: claim → scratch file → LibreOffice → PROCESSED
//!  └─ 5. Monitor   every 10 min, kill soffice.bin above 10 % memory
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docx2pdf_pipeline::{Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .input_dir("/srv/inbox")
//!         .output_dir("/srv/outbox")
//!         .redis_url("redis://127.0.0.1:6379")
//!         .build()?;
//!     let pipeline = Pipeline::connect(config).await?;
//!     tokio::signal::ctrl_c().await?;
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docx2pdf` binary (clap + anyhow + tracing-subscriber) |
//!
//! ## State keys
//!
//! | Key | Values |
//! |-----|--------|
//! | `<prefix>:read:<filename>`  | `READ` (Redis queue with the shared read filter only) |
//! | `<prefix>:state:<filename>` | `PROCESSING`, `PROCESSED` |
//!
//! Every key carries the configured TTL (five days by default). A file whose
//! conversion failed stays `PROCESSING` until then.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod converter;
pub mod error;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, QueueBackend};
pub use converter::{ConversionJob, Converter, LibreOfficeConverter};
pub use error::{ConvertError, PipelineError, StoreError, TaskError};
pub use model::{FileState, ProcessSample, WorkItem};
pub use monitor::{ProcessInspector, ProcessMonitor, PsInspector};
pub use pipeline::dispatch::{Admission, DispatchFilter};
pub use pipeline::queue::{LocalQueue, RedisQueue, WorkQueue};
pub use pipeline::worker::{ConversionPool, TaskOutcome};
pub use service::{Collaborators, Pipeline};
pub use store::{IdempotencyStore, RedisStore};
pub use tracker::StateTracker;
