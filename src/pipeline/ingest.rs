//! Ingestion Router: turn new files in the input directory into work items.
//!
//! The input directory is scanned repeatedly and never modified, so every
//! file is observed again on every pass. Two filters keep that from turning
//! into unbounded re-ingestion:
//!
//! 1. [`SeenFilter`], process-local and checked first. It costs nothing and
//!    never touches the network. Entries expire with the state TTL, so a file
//!    whose conversion failed is picked up again once its store keys are gone.
//! 2. Optionally a shared [`StateTracker`] on the "read" namespace. Its
//!    set-if-absent claim lets several routers watch the same directory
//!    without publishing a file twice.
//!
//! ```text
//! OBSERVED ──seen locally?──▶ SKIPPED
//!    │
//!    ├─ read bytes ──fail──▶ DEFERRED (retried next scan)
//!    ├─ shared claim ──lost, READ──▶ SKIPPED (recorded)
//!    │               └─lost, unknown──▶ DEFERRED
//!    ├─ publish ──fail or shutdown──▶ DEFERRED (shared claim released)
//!    └─ publish ──▶ ADMITTED (recorded)
//! ```

use crate::error::PipelineError;
use crate::model::{FileState, WorkItem};
use crate::pipeline::queue::WorkQueue;
use crate::tracker::StateTracker;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Process-local record of filenames already admitted.
///
/// An entry counts for `ttl` after it was recorded, matching the lifetime of
/// the store keys written for the same file.
///
/// With a journal path the set survives restarts. Each line is
/// `<unix seconds>\t<filename>`; lines are appended on insert, and the file is
/// rewritten without expired entries when loaded.
#[derive(Debug)]
pub struct SeenFilter {
    ttl: Duration,
    names: Mutex<HashMap<String, Instant>>,
    journal: Option<PathBuf>,
}

impl SeenFilter {
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            ttl,
            names: Mutex::new(HashMap::new()),
            journal: None,
        }
    }

    /// Load (or start) a persisted filter at `path`.
    pub fn persistent(path: impl Into<PathBuf>, ttl: Duration) -> Result<Self, PipelineError> {
        let path = path.into();
        let seen_err = |source| PipelineError::SeenFile {
            path: path.clone(),
            source,
        };

        let mut names = HashMap::new();
        let mut stale = 0usize;
        match std::fs::File::open(&path) {
            Ok(file) => {
                let now = Instant::now();
                for line in BufReader::new(file).lines() {
                    let line = line.map_err(seen_err)?;
                    let Some((name, age)) = parse_journal_line(&line) else {
                        continue;
                    };
                    if age >= ttl {
                        stale += 1;
                        continue;
                    }
                    let recorded = now.checked_sub(age).unwrap_or(now);
                    if names.insert(name.to_string(), recorded).is_some() {
                        stale += 1;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(seen_err)?;
                }
            }
            Err(e) => return Err(seen_err(e)),
        }

        let filter = Self {
            ttl,
            names: Mutex::new(names),
            journal: Some(path.clone()),
        };
        if stale > 0 {
            filter.compact().map_err(seen_err)?;
        }
        info!(path = %path.display(), entries = filter.len(), dropped = stale, "Loaded seen-file list");
        Ok(filter)
    }

    /// Rewrite the journal with the live entries only.
    fn compact(&self) -> io::Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        let now_wall = SystemTime::now();
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for (name, recorded) in names.iter() {
            let stamp = now_wall.checked_sub(recorded.elapsed()).unwrap_or(now_wall);
            writeln!(tmp, "{}\t{name}", unix_secs(stamp))?;
        }
        tmp.as_file().sync_data()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn is_live(&self, recorded: &Instant) -> bool {
        recorded.elapsed() < self.ttl
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .is_some_and(|at| self.is_live(at))
    }

    /// Record `filename`. Returns `Ok(false)` if it was already present and
    /// not yet expired.
    ///
    /// The in-memory set is updated even when the journal append fails.
    pub fn insert(&self, filename: &str) -> io::Result<bool> {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        if names.get(filename).is_some_and(|at| self.is_live(at)) {
            return Ok(false);
        }
        names.retain(|_, at| self.is_live(at));
        names.insert(filename.to_string(), Instant::now());
        drop(names);

        if let Some(path) = &self.journal {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}\t{filename}", unix_secs(SystemTime::now()))?;
        }
        Ok(true)
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|at| self.is_live(at))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `<unix seconds>\t<filename>` → (filename, age). A line without a
/// timestamp is a bare filename recorded just now.
fn parse_journal_line(line: &str) -> Option<(&str, Duration)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (name, age) = match line.split_once('\t') {
        Some((secs, name)) => match secs.parse::<u64>() {
            Ok(secs) => {
                let recorded = UNIX_EPOCH + Duration::from_secs(secs);
                let age = SystemTime::now()
                    .duration_since(recorded)
                    .unwrap_or(Duration::ZERO);
                (name, age)
            }
            Err(_) => (line, Duration::ZERO),
        },
        None => (line.trim(), Duration::ZERO),
    };
    (!name.is_empty()).then_some((name, age))
}

/// Counters for one pass over the input directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Matching files seen in the directory.
    pub observed: usize,
    pub published: usize,
    /// Dropped by the local filter.
    pub skipped_seen: usize,
    /// Dropped because another router already read the file.
    pub skipped_shared: usize,
    /// Left for the next scan (read error, store error, publish error,
    /// shutdown).
    pub deferred: usize,
}

/// Watches one directory and publishes every new matching file once.
pub struct IngestionRouter {
    input_dir: PathBuf,
    include_suffix: String,
    seen: SeenFilter,
    shared: Option<StateTracker>,
    queue: Arc<dyn WorkQueue>,
}

impl IngestionRouter {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        include_suffix: &str,
        seen: SeenFilter,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            include_suffix: include_suffix.to_lowercase(),
            seen,
            shared: None,
            queue,
        }
    }

    /// Also claim each file in the shared "read" namespace before publishing.
    ///
    /// Pair this only with a queue that outlives the process; see
    /// [`PipelineConfig::shared_read_filter`](crate::PipelineConfig::shared_read_filter).
    pub fn with_shared_filter(mut self, tracker: StateTracker) -> Self {
        self.shared = Some(tracker);
        self
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    fn matches(&self, filename: &str) -> bool {
        filename.to_lowercase().ends_with(&self.include_suffix)
    }

    /// One pass over the input directory.
    ///
    /// Files are visited in name order. Only an unreadable directory is an
    /// error; per-file problems are counted as deferred.
    pub async fn scan_once(&self) -> Result<ScanReport, PipelineError> {
        self.scan(&CancellationToken::new()).await
    }

    /// [`scan_once`](Self::scan_once) that stops early once `shutdown`
    /// fires. A file whose publish is interrupted has its shared claim
    /// released, so no claim outlives an unpublished item.
    async fn scan(&self, shutdown: &CancellationToken) -> Result<ScanReport, PipelineError> {
        let dir_err = |source| PipelineError::InputDir {
            path: self.input_dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.input_dir).await.map_err(dir_err)?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(path = %entry.path().display(), "Skipping non-UTF-8 file name");
                continue;
            };
            if !self.matches(&name) {
                continue;
            }
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => candidates.push((name, entry.path())),
                Ok(_) => {}
                Err(e) => warn!(filename = %name, error = %e, "Cannot stat input file"),
            }
        }
        candidates.sort();

        let mut report = ScanReport {
            observed: candidates.len(),
            ..ScanReport::default()
        };
        for (name, path) in candidates {
            if shutdown.is_cancelled() {
                report.deferred += 1;
                continue;
            }
            self.route(&name, &path, &mut report, shutdown).await;
        }

        if report.published > 0 || report.deferred > 0 {
            info!(
                published = report.published,
                deferred = report.deferred,
                skipped = report.skipped_seen + report.skipped_shared,
                "Input scan complete"
            );
        }
        Ok(report)
    }

    async fn route(
        &self,
        filename: &str,
        path: &Path,
        report: &mut ScanReport,
        shutdown: &CancellationToken,
    ) {
        if self.seen.contains(filename) {
            report.skipped_seen += 1;
            return;
        }

        let payload = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(filename, error = %e, "Cannot read input file, will retry");
                report.deferred += 1;
                return;
            }
        };

        if let Some(shared) = &self.shared {
            if !shared.try_claim(filename).await {
                match shared.state(filename).await {
                    Ok(FileState::Read) => {
                        debug!(filename, "Already read by another router");
                        self.remember(filename);
                        report.skipped_shared += 1;
                    }
                    Ok(state) => {
                        debug!(filename, %state, "Shared claim not granted, will retry");
                        report.deferred += 1;
                    }
                    Err(e) => {
                        warn!(filename, error = %e, "Shared read filter unavailable, will retry");
                        report.deferred += 1;
                    }
                }
                return;
            }
        }

        let size = payload.len();
        let published = tokio::select! {
            biased;
            res = self.queue.publish(WorkItem::new(filename, payload)) => res,
            _ = shutdown.cancelled() => Err(PipelineError::Queue {
                queue: self.queue.name().to_string(),
                reason: "shutting down".into(),
            }),
        };
        if let Err(e) = published {
            warn!(filename, error = %e, "Publish failed, will retry");
            if let Some(shared) = &self.shared {
                shared.remove(filename).await;
            }
            report.deferred += 1;
            return;
        }

        self.remember(filename);
        report.published += 1;
        info!(filename, bytes = size, queue = self.queue.name(), "Admitted");
    }

    fn remember(&self, filename: &str) {
        if let Err(e) = self.seen.insert(filename) {
            warn!(filename, error = %e, "Could not persist seen-file entry");
        }
    }

    /// Scan every `interval` until `shutdown` fires.
    ///
    /// A scan in progress is not dropped on shutdown; it stops between files
    /// and releases any claim it cannot publish.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(dir = %self.input_dir.display(), suffix = %self.include_suffix, "Ingestion router started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.scan(&shutdown).await {
                warn!(error = %e, "Input scan failed");
            }
        }
        info!("Ingestion router stopped");
    }
}
