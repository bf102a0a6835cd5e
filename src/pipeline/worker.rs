//! Conversion Worker Pool.
//!
//! A fixed number of workers, each identified by a slot index. A submitted
//! item waits for a free slot, then runs:
//!
//! 1. claim the filename (`NEW → PROCESSING`); a lost claim ends the task
//! 2. write the payload to a uniquely named scratch file
//! 3. convert scratch file → `<output_dir>/<stem>.<target_extension>`
//! 4. delete the scratch file, whatever the conversion did
//! 5. on success, mark the filename `PROCESSED`
//!
//! A failed conversion leaves the `PROCESSING` record in place. Nothing
//! retries it; once the record's TTL lapses the file is eligible again.
//!
//! Submissions never block: beyond `size` running tasks they queue on the
//! semaphore inside their own tokio task.

use crate::converter::{ConversionJob, Converter};
use crate::error::{PipelineError, TaskError};
use crate::model::{output_path, WorkItem};
use crate::tracker::StateTracker;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Prefix of every scratch file name.
pub const SCRATCH_PREFIX: &str = "_temp";

/// Directory holding materialised payloads while they are converted.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create the directory (and parents) if missing.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| PipelineError::ScratchDir {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "Scratch directory ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `payload` to a fresh `_temp*<ext>` file.
    ///
    /// The file keeps the source extension so the converter can detect the
    /// input format. Dropping or closing the handle deletes it.
    pub async fn materialize(&self, filename: &str, payload: Vec<u8>) -> io::Result<NamedTempFile> {
        let suffix = Path::new(filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let dir = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .suffix(&suffix)
                .tempfile_in(&dir)?;
            file.write_all(&payload)?;
            file.as_file().sync_data()?;
            Ok::<_, io::Error>(file)
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Remove the directory recursively. Already gone is fine.
    pub async fn remove(&self) -> Result<(), PipelineError> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Scratch directory removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::ScratchDir {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// How a task that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Converted { output: PathBuf },
    /// Another worker (or process) holds the claim.
    AlreadyClaimed,
}

/// A running task's hold on the pool: a semaphore permit plus a slot index.
struct Slot<'a> {
    index: usize,
    free: &'a Mutex<Vec<usize>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.index);
    }
}

/// Fixed-size pool of conversion workers.
pub struct ConversionPool {
    tracker: StateTracker,
    converter: Arc<dyn Converter>,
    scratch: Arc<ScratchDir>,
    output_dir: PathBuf,
    target_extension: String,
    permits: Arc<Semaphore>,
    free_slots: Mutex<Vec<usize>>,
    tasks: TaskTracker,
    size: usize,
}

impl ConversionPool {
    pub fn new(
        size: usize,
        tracker: StateTracker,
        converter: Arc<dyn Converter>,
        scratch: Arc<ScratchDir>,
        output_dir: impl Into<PathBuf>,
        target_extension: impl Into<String>,
    ) -> Self {
        let size = size.max(1);
        Self {
            tracker,
            converter,
            scratch,
            output_dir: output_dir.into(),
            target_extension: target_extension.into(),
            permits: Arc::new(Semaphore::new(size)),
            free_slots: Mutex::new((0..size).rev().collect()),
            tasks: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks submitted and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Queue `item` for conversion and return immediately.
    ///
    /// The handle resolves to the task's result; callers are free to drop it.
    /// Failures are logged either way.
    pub fn submit(self: &Arc<Self>, item: WorkItem) -> JoinHandle<Result<TaskOutcome, TaskError>> {
        let pool = Arc::clone(self);
        self.tasks.spawn(async move {
            let filename = item.filename.clone();
            let result = pool.run_task(item).await;
            match &result {
                Ok(TaskOutcome::Converted { output }) => {
                    info!(filename = %filename, output = %output.display(), "Conversion complete")
                }
                Ok(TaskOutcome::AlreadyClaimed) => {
                    debug!(filename = %filename, "Claim lost, skipping")
                }
                Err(e) => error!(filename = %filename, error = %e, "Conversion task failed"),
            }
            result
        })
    }

    async fn acquire(&self, filename: &str) -> Result<Slot<'_>, TaskError> {
        let aborted = |detail: &str| TaskError::Aborted {
            filename: filename.to_string(),
            detail: detail.to_string(),
        };
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| aborted("worker pool closed"))?;
        let index = self
            .free_slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| aborted("no free worker slot"))?;
        Ok(Slot {
            index,
            free: &self.free_slots,
            _permit: permit,
        })
    }

    async fn run_task(&self, item: WorkItem) -> Result<TaskOutcome, TaskError> {
        let WorkItem { filename, payload } = item;
        let target = output_path(&self.output_dir, &filename, &self.target_extension)?;

        let slot = self.acquire(&filename).await?;

        if !self.tracker.try_claim(&filename).await {
            return Ok(TaskOutcome::AlreadyClaimed);
        }

        let scratch = self
            .scratch
            .materialize(&filename, payload)
            .await
            .map_err(|source| TaskError::Scratch {
                filename: filename.clone(),
                source,
            })?;
        debug!(filename = %filename, scratch = %scratch.path().display(), slot = slot.index, "Payload materialised");

        let converted = self
            .converter
            .convert(ConversionJob {
                source: scratch.path(),
                target: &target,
                slot: slot.index,
            })
            .await;
        let cleanup = scratch.close();
        drop(slot);

        converted.map_err(|source| TaskError::Convert {
            filename: filename.clone(),
            source,
        })?;

        if !self.tracker.mark_processed(&filename).await {
            warn!(filename = %filename, "Output written but state not recorded as PROCESSED");
        }

        cleanup.map_err(|source| TaskError::Scratch { filename, source })?;
        Ok(TaskOutcome::Converted { output: target })
    }

    /// Wait for every submitted task, queued ones included, to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "Waiting for conversions to finish");
        }
        self.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileState;
    use crate::store::memory::MemoryStore;
    use crate::testing::FakeConverter;
    use std::time::Duration;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(3600);

    struct Fixture {
        _dir: TempDir,
        out: PathBuf,
        scratch: Arc<ScratchDir>,
        store: Arc<MemoryStore>,
        converter: Arc<FakeConverter>,
        pool: Arc<ConversionPool>,
    }

    async fn fixture(size: usize, converter: FakeConverter) -> Fixture {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let scratch = Arc::new(ScratchDir::create(out.join("temp")).await.unwrap());
        let store = Arc::new(MemoryStore::new());
        let converter = Arc::new(converter);
        let tracker = StateTracker::for_processing(store.clone(), "t:state:", TTL);
        let pool = Arc::new(ConversionPool::new(
            size,
            tracker,
            converter.clone(),
            scratch.clone(),
            &out,
            "pdf",
        ));
        Fixture {
            _dir: dir,
            out,
            scratch,
            store,
            converter,
            pool,
        }
    }

    fn scratch_entries(f: &Fixture) -> usize {
        std::fs::read_dir(f.scratch.path()).unwrap().count()
    }

    #[tokio::test]
    async fn converts_and_marks_processed() {
        let f = fixture(2, FakeConverter::new()).await;
        let outcome = f
            .pool
            .submit(WorkItem::new("report.docx", b"DOC".to_vec()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Converted {
                output: f.out.join("report.pdf")
            }
        );
        assert!(f.out.join("report.pdf").is_file());
        assert_eq!(f.store.peek("t:state:report.docx").as_deref(), Some("PROCESSED"));
        assert_eq!(scratch_entries(&f), 0);

        let seen = f.converter.sources();
        assert_eq!(seen.len(), 1);
        let name = seen[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(SCRATCH_PREFIX) && name.ends_with(".docx"), "{name}");
    }

    #[tokio::test]
    async fn concurrent_duplicates_convert_once() {
        let f = fixture(4, FakeConverter::new().with_delay(Duration::from_millis(50))).await;
        let handles: Vec<_> = (0..8)
            .map(|_| f.pool.submit(WorkItem::new("report.docx", b"DOC".to_vec())))
            .collect();

        let mut converted = 0;
        for h in handles {
            if let TaskOutcome::Converted { .. } = h.await.unwrap().unwrap() {
                converted += 1;
            }
        }
        assert_eq!(converted, 1);
        assert_eq!(f.converter.calls(), 1);
    }

    #[tokio::test]
    async fn failed_conversion_keeps_claim_and_cleans_scratch() {
        let f = fixture(1, FakeConverter::failing()).await;
        let err = f
            .pool
            .submit(WorkItem::new("report.docx", b"DOC".to_vec()))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, TaskError::Convert { .. }));
        assert_eq!(scratch_entries(&f), 0);
        assert!(!f.out.join("report.pdf").exists());
        let tracker = StateTracker::for_processing(f.store.clone(), "t:state:", TTL);
        assert_eq!(
            tracker.state("report.docx").await.unwrap(),
            FileState::Processing
        );
    }

    #[tokio::test]
    async fn store_outage_means_no_conversion() {
        let f = fixture(1, FakeConverter::new()).await;
        f.store.set_unavailable(true);
        let outcome = f
            .pool
            .submit(WorkItem::new("report.docx", b"DOC".to_vec()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, TaskOutcome::AlreadyClaimed);
        assert_eq!(f.converter.calls(), 0);
    }

    #[tokio::test]
    async fn traversal_name_rejected_before_claim() {
        let f = fixture(1, FakeConverter::new()).await;
        let err = f
            .pool
            .submit(WorkItem::new("../escape.docx", b"x".to_vec()))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidFilename { .. }));
        assert_eq!(f.store.calls(), 0);
    }

    #[tokio::test]
    async fn pool_never_exceeds_size() {
        let f = fixture(2, FakeConverter::new().with_delay(Duration::from_millis(30))).await;
        let handles: Vec<_> = (0..6)
            .map(|i| f.pool.submit(WorkItem::new(format!("f{i}.docx"), b"x".to_vec())))
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(f.converter.calls(), 6);
        assert!(f.converter.max_concurrent() <= 2);
        let slots = f.converter.slots();
        assert!(slots.iter().all(|s| *s < 2), "{slots:?}");
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight() {
        let f = fixture(1, FakeConverter::new().with_delay(Duration::from_millis(50))).await;
        let _ = f.pool.submit(WorkItem::new("a.docx", b"x".to_vec()));
        let _ = f.pool.submit(WorkItem::new("b.docx", b"x".to_vec()));
        f.pool.shutdown().await;

        assert_eq!(f.pool.in_flight(), 0);
        assert!(f.out.join("a.pdf").is_file());
        assert!(f.out.join("b.pdf").is_file());
    }

    #[tokio::test]
    async fn scratch_dir_remove_deletes_nested_residue() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::create(dir.path().join("s/t")).await.unwrap();
        let open = scratch.materialize("a.docx", b"x".to_vec()).await.unwrap();
        let nested = scratch.path().join("leftover").join("deeper");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("_temp123.docx"), b"stale").unwrap();
        assert!(open.path().is_file());

        scratch.remove().await.unwrap();
        assert!(!scratch.path().exists());
        assert!(!open.path().exists());
        // Second removal is a no-op.
        scratch.remove().await.unwrap();
        drop(open);
    }
}
