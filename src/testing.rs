//! Recording fakes for the converter and process-inspection boundaries.

use crate::converter::{ConversionJob, Converter};
use crate::error::ConvertError;
use crate::monitor::ProcessInspector;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Converter that copies the source to the target, optionally slowly or
/// not at all.
#[derive(Default)]
pub(crate) struct FakeConverter {
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    sources: Mutex<Vec<PathBuf>>,
    slots: Mutex<Vec<usize>>,
}

impl FakeConverter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub(crate) fn sources(&self) -> Vec<PathBuf> {
        self.sources.lock().unwrap().clone()
    }

    pub(crate) fn slots(&self) -> Vec<usize> {
        self.slots.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, job: ConversionJob<'_>) -> Result<(), ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(job.source.to_path_buf());
        self.slots.lock().unwrap().push(job.slot);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(ConvertError::Failed {
                status: "exit status: 1".into(),
                stderr: "simulated failure".into(),
            });
        }
        std::fs::copy(job.source, job.target).map_err(|source| ConvertError::Output {
            path: job.target.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// Inspector returning a canned `ps aux` listing and recording kills.
#[derive(Default)]
pub(crate) struct FakeInspector {
    listing: Mutex<Vec<String>>,
    killed: Mutex<Vec<u32>>,
    unavailable: bool,
}

impl FakeInspector {
    pub(crate) fn with_listing(lines: &[&str]) -> Self {
        Self {
            listing: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn broken() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub(crate) fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessInspector for FakeInspector {
    async fn list(&self) -> io::Result<Vec<String>> {
        if self.unavailable {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ps: not found"));
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn kill(&self, pid: u32) -> io::Result<()> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}
