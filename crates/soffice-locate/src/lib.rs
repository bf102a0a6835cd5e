//! # soffice-locate
//!
//! Find the LibreOffice `soffice` launcher and prepare the per-worker user
//! profiles that headless conversions need.
//!
//! ## Why per-worker profiles?
//!
//! A LibreOffice user profile is locked by the first process that opens it.
//! Two headless `soffice --convert-to` invocations sharing the default profile
//! race on that lock and the loser exits without producing any output. Giving
//! every worker slot its own `-env:UserInstallation=file:///…` directory lets
//! N conversions run side by side.
//!
//! ## Lookup order
//!
//! 1. `SOFFICE_PATH` — explicit path to the launcher; used when it exists.
//! 2. Every directory on `PATH`, looking for `soffice` (`soffice.exe` on Windows).
//! 3. The platform's default install locations (see table).
//!
//! | OS      | Default locations |
//! |---------|-------------------|
//! | Linux   | `/usr/bin/soffice`, `/usr/lib/libreoffice/program/soffice`, `/opt/libreoffice/program/soffice`, `/snap/bin/libreoffice` |
//! | macOS   | `/Applications/LibreOffice.app/Contents/MacOS/soffice` |
//! | Windows | `C:\Program Files\LibreOffice\program\soffice.exe` |
//!
//! ## Environment variable overrides
//!
//! - `SOFFICE_PATH` — path to an existing `soffice` launcher.
//! - `SOFFICE_PROFILE_DIR` — override the root of the per-worker profiles.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Name of the long-running native process that does the actual rendering.
///
/// `soffice` is only a launcher script on most platforms; the process that
/// accumulates memory is `soffice.bin`.
pub const PROCESS_NAME: &str = "soffice.bin";

#[cfg(windows)]
const LAUNCHER_NAME: &str = "soffice.exe";
#[cfg(not(windows))]
const LAUNCHER_NAME: &str = "soffice";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by soffice-locate operations.
#[derive(Error, Debug)]
pub enum SofficeLocateError {
    /// No launcher was found in any searched location.
    #[error("LibreOffice 'soffice' not found (searched {} locations); set SOFFICE_PATH", searched.len())]
    NotFound { searched: Vec<PathBuf> },

    /// Could not create the profile directory for a worker slot.
    #[error("Profile directory error for '{path}': {source}")]
    ProfileDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Platform defaults ────────────────────────────────────────────────────────

fn default_install_locations() -> &'static [&'static str] {
    match std::env::consts::OS {
        "linux" | "freebsd" | "openbsd" | "netbsd" => &[
            "/usr/bin/soffice",
            "/usr/lib/libreoffice/program/soffice",
            "/usr/lib64/libreoffice/program/soffice",
            "/opt/libreoffice/program/soffice",
            "/snap/bin/libreoffice",
        ],
        "macos" => &["/Applications/LibreOffice.app/Contents/MacOS/soffice"],
        "windows" => &[
            r"C:\Program Files\LibreOffice\program\soffice.exe",
            r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
        ],
        _ => &[],
    }
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the path of the `soffice` launcher, searching once per process.
///
/// Subsequent calls return the cached result without touching the disk.
pub fn locate_soffice() -> Result<PathBuf, SofficeLocateError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let env_override = std::env::var_os("SOFFICE_PATH").map(PathBuf::from);
    let path_var = std::env::var_os("PATH");
    let defaults: Vec<PathBuf> = default_install_locations()
        .iter()
        .map(PathBuf::from)
        .collect();

    let path = locate_in(env_override.as_deref(), path_var.as_deref(), &defaults)?;

    // Both racers found the same file; losing the set is harmless.
    let _ = RESOLVED_PATH.set(path.clone());

    Ok(path)
}

/// Searches for the launcher with explicit inputs instead of the process
/// environment.
///
/// `env_override` wins when it exists; then each directory of `path_var`;
/// then `defaults` in order.
pub fn locate_in(
    env_override: Option<&Path>,
    path_var: Option<&OsStr>,
    defaults: &[PathBuf],
) -> Result<PathBuf, SofficeLocateError> {
    let mut searched = Vec::new();

    if let Some(p) = env_override {
        if p.is_file() {
            return Ok(p.to_path_buf());
        }
        searched.push(p.to_path_buf());
    }

    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(path_var) {
            let candidate = dir.join(LAUNCHER_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(candidate);
        }
    }

    for candidate in defaults {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
        searched.push(candidate.clone());
    }

    Err(SofficeLocateError::NotFound { searched })
}

/// Root directory holding one LibreOffice profile per worker slot.
///
/// Default locations:
/// - **Linux**: `~/.cache/docx2pdf/lo-profiles/`
/// - **macOS**: `~/Library/Caches/docx2pdf/lo-profiles/`
/// - **Windows**: `%LOCALAPPDATA%\docx2pdf\lo-profiles\`
///
/// Override by setting `SOFFICE_PROFILE_DIR`.
pub fn profile_root() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SOFFICE_PROFILE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("docx2pdf").join("lo-profiles")
}

/// Creates (if needed) and returns the profile directory for `slot` under `root`.
pub fn profile_dir_in(root: &Path, slot: usize) -> Result<PathBuf, SofficeLocateError> {
    let dir = root.join(format!("worker-{slot}"));
    std::fs::create_dir_all(&dir).map_err(|source| SofficeLocateError::ProfileDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Formats a profile directory as the `-env:UserInstallation=` argument
/// LibreOffice expects (a `file://` URL).
pub fn user_installation_arg(profile: &Path) -> String {
    let raw = profile.to_string_lossy().replace('\\', "/");
    let url = if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        format!("file:///{raw}")
    };
    format!("-env:UserInstallation={}", url.replace(' ', "%20"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
