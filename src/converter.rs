//! Converter boundary: source file in, target file out.
//!
//! [`LibreOfficeConverter`] drives `soffice --headless --convert-to`. Two
//! quirks of LibreOffice shape it:
//!
//! * Concurrent instances sharing one user profile block on its lock file,
//!   so every worker slot gets its own profile directory
//!   ([`soffice_locate::profile_dir_in`]).
//! * `--convert-to` only takes an output *directory* and names the result
//!   after the source. The file is produced in a staging directory next to
//!   the target and then renamed, so the output directory never holds a
//!   half-written file.

use crate::error::ConvertError;
use async_trait::async_trait;
use soffice_locate::SofficeLocateError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One conversion request.
#[derive(Debug, Clone, Copy)]
pub struct ConversionJob<'a> {
    pub source: &'a Path,
    pub target: &'a Path,
    /// Worker slot running the job, stable for the slot's lifetime.
    pub slot: usize,
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `job.source` into `job.target`.
    ///
    /// On success the target exists. On failure no partial target is left.
    async fn convert(&self, job: ConversionJob<'_>) -> Result<(), ConvertError>;
}

/// LibreOffice headless converter.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    program: PathBuf,
    profile_root: PathBuf,
    target_extension: String,
    timeout: Option<Duration>,
}

impl LibreOfficeConverter {
    pub fn new(
        program: impl Into<PathBuf>,
        profile_root: impl Into<PathBuf>,
        target_extension: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            profile_root: profile_root.into(),
            target_extension: target_extension.into(),
            timeout: None,
        }
    }

    /// Kill the child if a single conversion runs longer than `timeout`.
    ///
    /// Only the launched `soffice` process is killed. A `soffice.bin` it
    /// forked is not signalled and may outlive it as an orphan, which the
    /// [`ProcessMonitor`](crate::ProcessMonitor) ends only once it crosses
    /// the memory threshold.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, profile: &Path, outdir: &Path, source: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--headless")
            .arg("--norestore")
            .arg(soffice_locate::user_installation_arg(profile))
            .arg("--convert-to")
            .arg(&self.target_extension)
            .arg("--outdir")
            .arg(outdir)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    async fn convert(&self, job: ConversionJob<'_>) -> Result<(), ConvertError> {
        let output_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ConvertError::Output { path, source }
        };

        let profile =
            soffice_locate::profile_dir_in(&self.profile_root, job.slot).map_err(|e| match e {
                SofficeLocateError::ProfileDir { path, source } => ConvertError::Output { path, source },
                other => ConvertError::Output {
                    path: self.profile_root.clone(),
                    source: std::io::Error::other(other.to_string()),
                },
            })?;

        let target_dir = job
            .target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(target_dir)
            .map_err(output_err(target_dir))?;

        let mut cmd = self.command(&profile, staging.path(), job.source);
        debug!(program = %self.program.display(), source = %job.source.display(), slot = job.slot, "Launching converter");

        let child = cmd.output();
        let output = match self.timeout {
            None => child.await,
            Some(limit) => match tokio::time::timeout(limit, child).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(source = %job.source.display(), secs = limit.as_secs(), "Conversion timed out");
                    return Err(ConvertError::Timeout {
                        secs: limit.as_secs(),
                    });
                }
            },
        }
        .map_err(|source| ConvertError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ConvertError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stem = job
            .source
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        let mut produced = staging.path().join(stem);
        produced.set_extension(&self.target_extension);
        if !produced.is_file() {
            return Err(ConvertError::MissingOutput { expected: produced });
        }

        tokio::fs::rename(&produced, job.target)
            .await
            .map_err(output_err(job.target))?;
        info!(target = %job.target.display(), "Converted");
        Ok(())
    }
}
