//! Process Monitor: kill converter processes that hold too much memory.
//!
//! LibreOffice leaks across long runs of conversions. Every tick the monitor
//! lists processes, keeps the lines naming the converter binary, parses PID
//! and `%MEM` and force-kills anything strictly above the threshold. Nothing
//! carries over between ticks.
//!
//! A conversion whose process gets killed fails in its worker like any other
//! converter error.
//!
//! The OS is reached only through [`ProcessInspector`], so the threshold
//! logic runs against canned listings in tests.

use crate::model::ProcessSample;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `ps aux` row: USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND.
static PS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\S+\s+(\d+)\s+(\d+(?:\.\d+)?)\s+(\d+(?:\.\d+)?)\s+\S+\s+\S+\s+\S+\s+\S+\s+\S+\s+\S+\s+(.+)$",
    )
    .expect("static regex is valid")
});

/// Parse one `ps aux` line. Header and malformed lines give `None`.
pub fn parse_process_line(line: &str) -> Option<ProcessSample> {
    let caps = PS_LINE.captures(line.trim_end())?;
    Some(ProcessSample {
        pid: caps[1].parse().ok()?,
        cpu_percent: caps[2].parse().ok()?,
        memory_percent: caps[3].parse().ok()?,
        command: caps[4].to_string(),
    })
}

/// Access to the OS process table.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Full process listing, one line per process, header included.
    async fn list(&self) -> io::Result<Vec<String>>;

    /// Forcibly terminate `pid` and wait for the signal to be delivered.
    async fn kill(&self, pid: u32) -> io::Result<()>;
}

/// [`ProcessInspector`] backed by `ps aux` and `kill -9`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsInspector;

#[async_trait]
impl ProcessInspector for PsInspector {
    async fn list(&self) -> io::Result<Vec<String>> {
        let output = Command::new("ps").arg("aux").output().await?;
        if !output.status.success() {
            return Err(io::Error::other(format!("ps aux exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_owned)
            .collect())
    }

    async fn kill(&self, pid: u32) -> io::Result<()> {
        let status = Command::new("kill")
            .arg("-9")
            .arg(pid.to_string())
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("kill -9 {pid} exited with {status}")))
        }
    }
}

/// Result of one monitor tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    /// Lines naming the converter process.
    pub matched: usize,
    /// Matching lines that could not be parsed.
    pub unparsed: usize,
    pub killed: Vec<u32>,
    pub kill_failed: Vec<u32>,
}

pub struct ProcessMonitor {
    inspector: Arc<dyn ProcessInspector>,
    process_name: String,
    threshold_percent: f32,
    interval: Duration,
}

impl ProcessMonitor {
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        process_name: impl Into<String>,
        threshold_percent: f32,
        interval: Duration,
    ) -> Self {
        Self {
            inspector,
            process_name: process_name.into(),
            threshold_percent,
            interval,
        }
    }

    /// Whether `sample` is over the kill threshold.
    pub fn exceeds(&self, sample: &ProcessSample) -> bool {
        sample.memory_percent > self.threshold_percent
    }

    /// List, parse, kill. One pass, no state kept.
    pub async fn sweep(&self) -> io::Result<SweepReport> {
        let listing = self.inspector.list().await?;
        let mut report = SweepReport::default();

        for line in listing.iter().filter(|l| l.contains(&self.process_name)) {
            report.matched += 1;
            let Some(sample) = parse_process_line(line) else {
                debug!(line = %line, "Skipping unparsable process line");
                report.unparsed += 1;
                continue;
            };
            debug!(pid = sample.pid, cpu_percent = sample.cpu_percent, mem_percent = sample.memory_percent, "Converter process");

            if !self.exceeds(&sample) {
                continue;
            }
            warn!(
                pid = sample.pid,
                mem_percent = sample.memory_percent,
                threshold = self.threshold_percent,
                "Killing converter process over memory threshold"
            );
            match self.inspector.kill(sample.pid).await {
                Ok(()) => report.killed.push(sample.pid),
                Err(e) => {
                    warn!(pid = sample.pid, error = %e, "Kill failed");
                    report.kill_failed.push(sample.pid);
                }
            }
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` fires. The first sweep runs
    /// one full interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            process = %self.process_name,
            threshold = self.threshold_percent,
            every_secs = self.interval.as_secs(),
            "Process monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.sweep().await {
                    Ok(report) if !report.killed.is_empty() => {
                        info!(killed = ?report.killed, "Process sweep complete")
                    }
                    Ok(report) => debug!(matched = report.matched, "Process sweep complete"),
                    Err(e) => warn!(error = %e, "Process listing failed"),
                },
            }
        }
        info!("Process monitor stopped");
    }
}
