//! Pipeline stages for idempotent DOCX-to-PDF conversion.
//!
//! Each submodule owns one stage. Stages talk only through the work queue
//! and the idempotency store, never through shared in-process state.
//!
//! ## Data Flow
//!
//! ```text
//! input dir ──▶ ingest ──▶ queue ──▶ dispatch ──▶ worker ──▶ output dir
//!  (scan)      (seen /    (local /   (state     (claim,
//!              read ns)    redis)     check)     convert)
//! ```
//!
//! 1. [`ingest`]   — rescan the input directory, drop files already seen,
//!    publish the rest as [`WorkItem`](crate::model::WorkItem)s
//! 2. [`queue`]    — broker boundary; in-process channel or a Redis list
//! 3. [`dispatch`] — second dedup gate against the conversion namespace
//! 4. [`worker`]   — bounded pool: claim, scratch file, convert, clean up,
//!    mark processed

pub mod dispatch;
pub mod ingest;
pub mod queue;
pub mod worker;
