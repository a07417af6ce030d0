//! Console progress lines for long scans.
//!
//! ```text
//!  [      1000 /      52000]     333.33 per second,   1.92% done, finishing at 2024-05-01 13:02:11
//! ```
//!
//! Lines end in `\r` while work remains and `\n` once `so_far >= total`.

use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Receives progress updates from a long-running pass.
pub trait ProgressSink {
    fn update(&mut self, so_far: u64, total: u64);
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _so_far: u64, _total: u64) {}
}

/// Writes progress lines to `out`, starting one second after creation.
pub struct ProgressPrinter<W: Write> {
    out: W,
    started: Instant,
}

impl<W: Write> ProgressPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: Instant::now(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressSink for ProgressPrinter<W> {
    fn update(&mut self, so_far: u64, total: u64) {
        let elapsed = self.started.elapsed();
        if elapsed < Duration::from_secs(1) {
            return;
        }
        let line = format_progress(so_far, total, elapsed, Local::now());
        let written = self.out.write_all(line.as_bytes()).and_then(|_| self.out.flush());
        if let Err(e) = written {
            tracing::debug!("progress output failed: {}", e);
        }
    }
}

/// Render one progress line as of `now`, `elapsed` after the work began.
pub fn format_progress(so_far: u64, total: u64, elapsed: Duration, now: DateTime<Local>) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { so_far as f64 / secs } else { 0.0 };
    let percent = if total == 0 {
        100.0
    } else {
        so_far as f64 / total as f64 * 100.0
    };

    let left = total.saturating_sub(so_far);
    let finishing = if left == 0 {
        now.format("%Y-%m-%d %H:%M:%S").to_string()
    } else if rate > 0.0 {
        let millis = (left as f64 / rate * 1000.0) as i64;
        match chrono::Duration::try_milliseconds(millis).and_then(|d| now.checked_add_signed(d)) {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "unknown".to_string(),
        }
    } else {
        "unknown".to_string()
    };

    let eol = if so_far >= total { '\n' } else { '\r' };
    format!(
        " [{so_far:>10} / {total:>10}] {rate:>10.2} per second, {percent:>6.2}% done, finishing at {finishing}{eol}"
    )
}
