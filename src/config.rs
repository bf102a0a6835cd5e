//! Configuration for the ingestion-and-dispatch pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Every knob lives in one `Clone` struct so it
//! can be handed to each concurrent activity and logged at startup.
//!
//! Defaults mirror the production deployment: `.docx` in, `.pdf` out, a
//! five-day state TTL, one worker per CPU and a ten-minute memory sweep with a
//! 10 % threshold.

use crate::error::PipelineError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default lifetime of every idempotency record.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(5 * 24 * 60 * 60);

/// Default Process Monitor period.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default memory share above which a converter process is killed.
pub const DEFAULT_MEMORY_THRESHOLD_PERCENT: f32 = 10.0;

/// Fallback worker count when CPU detection fails.
pub const FALLBACK_WORKERS: usize = 4;

/// Worker pool size: one per available processing unit.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// Transport behind the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    /// Bounded in-process channel. Router and dispatcher share one process.
    #[default]
    Local,
    /// Redis list named by `queue_name`, shareable between processes.
    Redis,
}

impl fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueBackend::Local => "local",
            QueueBackend::Redis => "redis",
        })
    }
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(QueueBackend::Local),
            "redis" => Ok(QueueBackend::Redis),
            other => Err(format!("unknown queue backend '{other}' (expected local or redis)")),
        }
    }
}

/// Configuration for a pipeline instance.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docx2pdf_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("/srv/inbox")
///     .output_dir("/srv/outbox")
///     .workers(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.scratch_dir(), std::path::PathBuf::from("/srv/outbox/temp"));
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory scanned for new documents. Never modified. Default: `./input`.
    pub input_dir: PathBuf,

    /// Only files whose name ends with this suffix are ingested
    /// (case-insensitive). Default: `.docx`.
    pub include_suffix: String,

    /// Directory receiving converted files. Default: `./output`.
    pub output_dir: PathBuf,

    /// Extension given to converted files, without the dot. Default: `pdf`.
    pub target_extension: String,

    /// Scratch directory for materialised payloads. Default: `<output_dir>/temp`.
    pub scratch_dir: Option<PathBuf>,

    /// Idempotency store endpoint. Default: `redis://127.0.0.1:6379`.
    pub redis_url: String,

    /// Base of every store key. Default: `docx-pdf-idempotent`.
    pub key_prefix: String,

    /// TTL applied to every store key. Default: 5 days.
    ///
    /// A file whose conversion failed stays `PROCESSING` until this expires;
    /// after that it is eligible for a fresh attempt.
    pub state_ttl: Duration,

    /// Fixed conversion pool size. Default: available parallelism.
    pub workers: usize,

    /// How often the input directory is rescanned. Default: 2 s.
    pub scan_interval: Duration,

    /// Broker queue name. Default: `fileQueue`.
    pub queue_name: String,

    /// Queue transport. Default: [`QueueBackend::Local`].
    pub queue_backend: QueueBackend,

    /// Capacity of the in-process queue. Default: 1024.
    pub queue_capacity: usize,

    /// Optional file persisting the router's local seen-list across restarts.
    ///
    /// Only valid with [`QueueBackend::Redis`], for the same reason as
    /// `shared_read_filter`.
    pub seen_file: Option<PathBuf>,

    /// Also claim the distributed "read" namespace before publishing a file.
    /// Default: false.
    ///
    /// Only valid with [`QueueBackend::Redis`]. A read claim outlives the
    /// process, while an in-process queue does not: an item still queued at
    /// exit would leave its file marked read until the TTL expires.
    pub shared_read_filter: bool,

    /// Process Monitor period. Default: 10 minutes.
    pub monitor_interval: Duration,

    /// Memory percentage strictly above which a converter process is killed.
    /// Default: 10.0.
    pub memory_threshold_percent: f32,

    /// Process name matched in the OS process listing. Default: `soffice.bin`.
    pub process_name: String,

    /// Explicit path to the `soffice` launcher. Default: located at startup.
    pub soffice_path: Option<PathBuf>,

    /// Optional per-conversion timeout. Default: none (a stuck conversion is
    /// only ended by the Process Monitor).
    ///
    /// On expiry only the `soffice` launcher is killed. A `soffice.bin`
    /// child it forked can outlive it until the Process Monitor finds it
    /// over the memory threshold, or forever if it stays below.
    pub convert_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            include_suffix: ".docx".to_string(),
            output_dir: PathBuf::from("output"),
            target_extension: "pdf".to_string(),
            scratch_dir: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "docx-pdf-idempotent".to_string(),
            state_ttl: DEFAULT_STATE_TTL,
            workers: default_workers(),
            scan_interval: Duration::from_secs(2),
            queue_name: "fileQueue".to_string(),
            queue_backend: QueueBackend::Local,
            queue_capacity: 1024,
            seen_file: None,
            shared_read_filter: false,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            memory_threshold_percent: DEFAULT_MEMORY_THRESHOLD_PERCENT,
            process_name: soffice_locate::PROCESS_NAME.to_string(),
            soffice_path: None,
            convert_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective scratch directory.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("temp"))
    }

    /// Key prefix of the ingestion ("read") namespace.
    pub fn read_namespace(&self) -> String {
        format!("{}:read:", self.key_prefix)
    }

    /// Key prefix of the conversion ("processing"/"processed") namespace.
    pub fn state_namespace(&self) -> String {
        format!("{}:state:", self.key_prefix)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn include_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.include_suffix = suffix.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn target_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.target_extension = ext.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = url.into();
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn state_ttl(mut self, ttl: Duration) -> Self {
        self.config.state_ttl = ttl;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn scan_interval(mut self, every: Duration) -> Self {
        self.config.scan_interval = every;
        self
    }

    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.queue_name = name.into();
        self
    }

    pub fn queue_backend(mut self, backend: QueueBackend) -> Self {
        self.config.queue_backend = backend;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n.max(1);
        self
    }

    pub fn seen_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.seen_file = Some(path.into());
        self
    }

    pub fn shared_read_filter(mut self, v: bool) -> Self {
        self.config.shared_read_filter = v;
        self
    }

    pub fn monitor_interval(mut self, every: Duration) -> Self {
        self.config.monitor_interval = every;
        self
    }

    pub fn memory_threshold_percent(mut self, pct: f32) -> Self {
        self.config.memory_threshold_percent = pct;
        self
    }

    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.config.process_name = name.into();
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = Some(path.into());
        self
    }

    pub fn convert_timeout(mut self, timeout: Duration) -> Self {
        self.config.convert_timeout = Some(timeout);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if c.workers == 0 {
            return invalid("workers must be ≥ 1".into());
        }
        if c.include_suffix.trim().is_empty() {
            return invalid("include_suffix must not be empty".into());
        }
        let ext = &c.target_extension;
        if ext.is_empty() || ext.starts_with('.') || ext.contains(['/', '\\']) {
            return invalid(format!(
                "target_extension must be a bare extension like 'pdf', got '{ext}'"
            ));
        }
        if !(c.memory_threshold_percent > 0.0 && c.memory_threshold_percent <= 100.0) {
            return invalid(format!(
                "memory_threshold_percent must be in (0, 100], got {}",
                c.memory_threshold_percent
            ));
        }
        if c.state_ttl < Duration::from_secs(1) {
            return invalid("state_ttl must be at least one second".into());
        }
        if c.scan_interval.is_zero() || c.monitor_interval.is_zero() {
            return invalid("scan_interval and monitor_interval must be non-zero".into());
        }
        if c.process_name.trim().is_empty() {
            return invalid("process_name must not be empty".into());
        }
        if c.queue_name.trim().is_empty() {
            return invalid("queue_name must not be empty".into());
        }
        if c.key_prefix.is_empty() {
            return invalid("key_prefix must not be empty".into());
        }
        if c.queue_backend == QueueBackend::Local {
            if c.shared_read_filter {
                return invalid(
                    "shared_read_filter requires the redis queue backend: \
                     items in the local queue are lost on exit while their read claim stays"
                        .into(),
                );
            }
            if c.seen_file.is_some() {
                return invalid(
                    "seen_file requires the redis queue backend: \
                     items in the local queue are lost on exit while the journal keeps them"
                        .into(),
                );
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let c = PipelineConfig::default();
        assert_eq!(c.include_suffix, ".docx");
        assert_eq!(c.target_extension, "pdf");
        assert_eq!(c.state_ttl, Duration::from_secs(432_000));
        assert_eq!(c.monitor_interval, Duration::from_secs(600));
        assert_eq!(c.memory_threshold_percent, 10.0);
        assert_eq!(c.process_name, "soffice.bin");
        assert!(c.workers >= 1);
        assert!(c.convert_timeout.is_none());
    }

    #[test]
    fn scratch_defaults_under_output() {
        let c = PipelineConfig::builder().output_dir("/data/out").build().unwrap();
        assert_eq!(c.scratch_dir(), PathBuf::from("/data/out/temp"));

        let c = PipelineConfig::builder()
            .output_dir("/data/out")
            .scratch_dir("/fast/scratch")
            .build()
            .unwrap();
        assert_eq!(c.scratch_dir(), PathBuf::from("/fast/scratch"));
    }

    #[test]
    fn namespaces_are_disjoint() {
        let c = PipelineConfig::default();
        assert_eq!(c.read_namespace(), "docx-pdf-idempotent:read:");
        assert_eq!(c.state_namespace(), "docx-pdf-idempotent:state:");
    }

    #[test]
    fn zero_workers_rejected() {
        let err = PipelineConfig::builder().workers(0).build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn dotted_extension_rejected() {
        assert!(PipelineConfig::builder()
            .target_extension(".pdf")
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .target_extension("../pdf")
            .build()
            .is_err());
    }

    #[test]
    fn threshold_bounds() {
        assert!(PipelineConfig::builder()
            .memory_threshold_percent(0.0)
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .memory_threshold_percent(100.5)
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .memory_threshold_percent(25.0)
            .build()
            .is_ok());
    }

    #[test]
    fn queue_backend_parses() {
        assert_eq!("Redis".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert_eq!("local".parse::<QueueBackend>().unwrap(), QueueBackend::Local);
        assert!("kafka".parse::<QueueBackend>().is_err());
        assert_eq!(PipelineConfig::default().queue_backend, QueueBackend::Local);
    }

    #[test]
    fn shared_read_filter_needs_durable_queue() {
        assert!(!PipelineConfig::default().shared_read_filter);

        let err = PipelineConfig::builder()
            .shared_read_filter(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(msg) if msg.contains("redis")));

        let c = PipelineConfig::builder()
            .queue_backend(QueueBackend::Redis)
            .shared_read_filter(true)
            .build()
            .unwrap();
        assert!(c.shared_read_filter);
    }

    #[test]
    fn seen_file_needs_durable_queue() {
        assert!(PipelineConfig::builder()
            .seen_file("/var/lib/docx2pdf/seen.txt")
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .queue_backend(QueueBackend::Redis)
            .seen_file("/var/lib/docx2pdf/seen.txt")
            .build()
            .is_ok());
    }

    #[test]
    fn tiny_ttl_rejected() {
        assert!(PipelineConfig::builder()
            .state_ttl(Duration::from_millis(10))
            .build()
            .is_err());
    }
}
