//! CLI binary for docx2pdf-pipeline.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `PipelineConfig`, runs the pipeline and shuts it down on
//! Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use docx2pdf_pipeline::{Pipeline, PipelineConfig, QueueBackend};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn paint(code: &str, s: &str) -> String {
    if io::stderr().is_terminal() {
        format!("\x1b[{code}m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

fn bold(s: &str) -> String {
    paint("1", s)
}

fn dim(s: &str) -> String {
    paint("2", s)
}

const AFTER_HELP: &str = r#"EXAMPLES:
  docx2pdf --input /srv/inbox --output /srv/outbox
  REDIS_URL=redis://cache:6379 docx2pdf -i in -o out --workers 4
  docx2pdf -i in -o out --queue redis --queue-name fileQueue --shared-read

STATE:
  Each converted file gets the Redis key <prefix>:state:<name>. With
  --queue redis --shared-read it also gets <prefix>:read:<name>. Keys expire
  after --state-ttl seconds; delete them to force a new conversion.
  --shared-read and --seen-file need --queue redis.

LIBREOFFICE:
  The converter is `soffice`, found via SOFFICE_PATH, then PATH, then the
  usual install locations. Each worker gets its own LibreOffice profile under
  SOFFICE_PROFILE_DIR (default: the user cache directory).
"#;

/// Convert Word documents dropped into a directory to PDF, exactly once.
#[derive(Parser, Debug)]
#[command(
    name = "docx2pdf",
    version,
    about = "Idempotent DOCX-to-PDF conversion daemon",
    long_about = "Watch an input directory and convert every new .docx file to PDF with \
LibreOffice. Redis records which files were read and converted, so duplicates from \
rescans, redeliveries or several instances are converted only once.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory scanned for new documents. Never modified.
    #[arg(short, long, env = "INPUT_PATH", default_value = "input")]
    input: PathBuf,

    /// Directory receiving converted files.
    #[arg(short, long, env = "OUTPUT_PATH", default_value = "output")]
    output: PathBuf,

    /// Scratch directory [default: <OUTPUT>/temp].
    #[arg(long, env = "DOCX2PDF_SCRATCH")]
    scratch: Option<PathBuf>,

    /// Only files ending with this suffix are ingested (case-insensitive).
    #[arg(long, env = "DOCX2PDF_SUFFIX", default_value = ".docx")]
    suffix: String,

    /// Output format passed to LibreOffice's --convert-to.
    #[arg(long, env = "DOCX2PDF_TARGET", default_value = "pdf")]
    target: String,

    /// Redis endpoint for idempotency state.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Prefix of every Redis key.
    #[arg(long, env = "DOCX2PDF_KEY_PREFIX", default_value = "docx-pdf-idempotent")]
    key_prefix: String,

    /// Lifetime of state records in seconds.
    #[arg(long, env = "DOCX2PDF_STATE_TTL", default_value_t = 432_000)]
    state_ttl: u64,

    /// Conversion workers [default: number of CPUs].
    #[arg(short, long, env = "DOCX2PDF_WORKERS")]
    workers: Option<usize>,

    /// Seconds between input directory scans.
    #[arg(long, env = "DOCX2PDF_SCAN_INTERVAL", default_value_t = 2)]
    scan_interval: u64,

    /// Queue transport: `local` or `redis`.
    #[arg(long, env = "DOCX2PDF_QUEUE", default_value = "local")]
    queue: QueueBackend,

    /// Queue name (the Redis list key with `--queue redis`).
    #[arg(long, env = "DOCX2PDF_QUEUE_NAME", default_value = "fileQueue")]
    queue_name: String,

    /// Persist the local seen-file list here (needs `--queue redis`).
    #[arg(long, env = "DOCX2PDF_SEEN_FILE")]
    seen_file: Option<PathBuf>,

    /// Claim files in the shared Redis "read" namespace before publishing,
    /// so several instances never enqueue one file twice (needs `--queue redis`).
    #[arg(long, env = "DOCX2PDF_SHARED_READ")]
    shared_read: bool,

    /// Seconds between converter memory sweeps.
    #[arg(long, env = "DOCX2PDF_MONITOR_INTERVAL", default_value_t = 600)]
    monitor_interval: u64,

    /// Kill converter processes using more than this % of memory.
    #[arg(long, env = "DOCX2PDF_MEMORY_THRESHOLD", default_value_t = 10.0)]
    memory_threshold: f32,

    /// Path to the `soffice` launcher.
    #[arg(long, env = "SOFFICE_PATH")]
    soffice: Option<PathBuf>,

    /// Kill a single conversion after this many seconds.
    #[arg(long, env = "DOCX2PDF_CONVERT_TIMEOUT")]
    convert_timeout: Option<u64>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCX2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCX2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    if !cli.quiet {
        eprintln!(
            "{} {} → {}  {}",
            bold("docx2pdf"),
            config.input_dir.display(),
            config.output_dir.display(),
            dim(&format!(
                "({} workers, {} queue, {})",
                config.workers, config.queue_backend, config.redis_url
            )),
        );
    }

    let pipeline = Pipeline::connect(config)
        .await
        .context("Failed to start pipeline")?;

    wait_for_signal().await?;

    if !cli.quiet && pipeline.in_flight() > 0 {
        eprintln!(
            "{}",
            dim(&format!(
                "Waiting for {} conversion(s) to finish…",
                pipeline.in_flight()
            ))
        );
    }
    pipeline
        .shutdown()
        .await
        .context("Pipeline did not shut down cleanly")?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut b = PipelineConfig::builder()
        .input_dir(&cli.input)
        .output_dir(&cli.output)
        .include_suffix(&cli.suffix)
        .target_extension(&cli.target)
        .redis_url(&cli.redis_url)
        .key_prefix(&cli.key_prefix)
        .state_ttl(Duration::from_secs(cli.state_ttl))
        .scan_interval(Duration::from_secs(cli.scan_interval))
        .queue_backend(cli.queue)
        .queue_name(&cli.queue_name)
        .shared_read_filter(cli.shared_read)
        .monitor_interval(Duration::from_secs(cli.monitor_interval))
        .memory_threshold_percent(cli.memory_threshold);

    if let Some(n) = cli.workers {
        b = b.workers(n);
    }
    if let Some(dir) = &cli.scratch {
        b = b.scratch_dir(dir);
    }
    if let Some(path) = &cli.seen_file {
        b = b.seen_file(path);
    }
    if let Some(path) = &cli.soffice {
        b = b.soffice_path(path);
    }
    if let Some(secs) = cli.convert_timeout {
        b = b.convert_timeout(Duration::from_secs(secs));
    }

    b.build().context("Invalid configuration")
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Cannot install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Cannot listen for Ctrl-C")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for Ctrl-C")
}
