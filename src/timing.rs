//! Build phase durations, logged and appended to the run's timestamp file.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Wall-clock time of one build phase.
pub struct PhaseTimer {
    phase: String,
    start: Instant,
    record: Option<PathBuf>,
}

impl PhaseTimer {
    pub fn start(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            start: Instant::now(),
            record: None,
        }
    }

    /// Also append the duration to `file` when the phase finishes.
    /// `None` (no timestamp file in this context) only logs.
    pub fn recording_to(mut self, file: Option<PathBuf>) -> Self {
        self.record = file;
        self
    }

    /// Stop the clock. A phase that errored out is never finished, so only
    /// completed phases show up in the record.
    pub fn finish(self) -> Result<Duration> {
        let elapsed = self.start.elapsed();
        let line = format!("Phase {}: {}", self.phase, format_elapsed(elapsed));
        info!("{line}");

        if let Some(path) = &self.record {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            writeln!(file, "{line}")?;
        }
        Ok(elapsed)
    }
}

/// `42.0s` under a minute, `3m 07s` above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let whole = elapsed.as_secs();
        format!("{}m {:02}s", whole / 60, whole % 60)
    }
}
