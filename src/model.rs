//! Data carried through the pipeline.

use crate::error::TaskError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A unit of pipeline work: one input file's name and raw bytes.
///
/// `filename` is the identity used for every deduplication decision; it is
/// the bare file name (no directories) as observed in the input location.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub filename: String,
    pub payload: Vec<u8>,
}

impl WorkItem {
    pub fn new(filename: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("filename", &self.filename)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// Processing state recorded for a filename in the idempotency store.
///
/// `New` is never written: it is what an absent key means. `Read` lives only
/// in the ingestion namespace; `Processing` and `Processed` only in the
/// conversion namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    New,
    Read,
    Processing,
    Processed,
}

impl FileState {
    /// The string stored as the key's value.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::New => "NEW",
            FileState::Read => "READ",
            FileState::Processing => "PROCESSING",
            FileState::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(FileState::New),
            "READ" => Ok(FileState::Read),
            "PROCESSING" => Ok(FileState::Processing),
            "PROCESSED" => Ok(FileState::Processed),
            other => Err(format!("unknown file state '{other}'")),
        }
    }
}

/// One observation of an external converter process.
///
/// Built fresh on every monitor tick and dropped after the kill decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub command: String,
}

/// Reject names that could escape the directory they are joined onto.
pub fn validate_filename(filename: &str) -> Result<(), TaskError> {
    let reject = |reason| {
        Err(TaskError::InvalidFilename {
            filename: filename.to_string(),
            reason,
        })
    };

    if filename.trim().is_empty() {
        return reject("empty name");
    }
    if filename.contains('/') || filename.contains('\\') {
        return reject("contains a path separator");
    }
    if filename == "." || filename == ".." {
        return reject("is a relative directory reference");
    }
    if filename.contains('\0') {
        return reject("contains a NUL byte");
    }
    Ok(())
}

/// Output file name: the source extension replaced by `target_extension`.
///
/// `report.docx` → `report.pdf`; `a.b.docx` → `a.b.pdf`; a name without an
/// extension (or a dot-file such as `.docx`) gets the extension appended.
pub fn output_file_name(filename: &str, target_extension: &str) -> String {
    let stem = match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    };
    format!("{stem}.{target_extension}")
}

/// Full output path for `filename` inside `output_dir`.
pub fn output_path(
    output_dir: &Path,
    filename: &str,
    target_extension: &str,
) -> Result<PathBuf, TaskError> {
    validate_filename(filename)?;
    Ok(output_dir.join(output_file_name(filename, target_extension)))
}
