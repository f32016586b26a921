use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

pub(crate) const BAR_SEGMENTS: usize = 20;
pub(crate) const UPDATE_INTERVAL: Duration = Duration::from_secs(3);

const BYTES_IN_MB: f64 = 1024.0 * 1024.0;

/// Number of filled bar segments for `current` out of `total` bytes.
pub(crate) fn filled_segments(current: u64, total: u64) -> usize {
    if total == 0 {
        return 0;
    }
    let current = current.min(total);
    ((BAR_SEGMENTS as u128 * current as u128) / total as u128) as usize
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgressReport {
    pub(crate) label: &'static str,
    pub(crate) filled_segments: usize,
    pub(crate) percentage: f64,
    pub(crate) speed_mb_per_sec: f64,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bar = "●".repeat(self.filled_segments) + &"○".repeat(BAR_SEGMENTS - self.filled_segments);
        write!(
            f,
            "Status: {}\n[{}] {:.1}%\nSpeed: {:.2} MB/s",
            self.label, bar, self.percentage, self.speed_mb_per_sec
        )
    }
}

/// Progress state of a single download or upload.
///
/// Samples are fed in at whatever cadence the transfer produces them; a report
/// comes out at most once per [`UPDATE_INTERVAL`]. The first report is due one
/// interval after the transfer started. There is no guaranteed report for the
/// final sample, callers announce completion themselves.
#[derive(Debug)]
pub(crate) struct TransferTracker {
    label: &'static str,
    started_at: Instant,
    last_sample_at: Instant,
    bytes_at_last_sample: u64,
    bytes_transferred: u64,
    total_bytes: u64,
}

impl TransferTracker {
    pub(crate) fn new(label: &'static str) -> Self {
        Self::started_at(label, Instant::now())
    }

    pub(crate) fn started_at(label: &'static str, now: Instant) -> Self {
        Self {
            label,
            started_at: now,
            last_sample_at: now,
            bytes_at_last_sample: 0,
            bytes_transferred: 0,
            total_bytes: 0,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.last_sample_at.duration_since(self.started_at)
    }

    pub(crate) fn on_progress(&mut self, current: u64, total: u64) -> Option<ProgressReport> {
        self.on_progress_at(current, total, Instant::now())
    }

    pub(crate) fn on_progress_at(
        &mut self,
        current: u64,
        total: u64,
        now: Instant,
    ) -> Option<ProgressReport> {
        if total == 0 {
            return None;
        }
        let current = current.min(total);
        self.bytes_transferred = current;
        self.total_bytes = total;

        let elapsed = now.saturating_duration_since(self.last_sample_at);
        if elapsed < UPDATE_INTERVAL {
            return None;
        }

        let speed_mb_per_sec = if elapsed.is_zero() {
            0.0
        } else {
            current.saturating_sub(self.bytes_at_last_sample) as f64
                / BYTES_IN_MB
                / elapsed.as_secs_f64()
        };

        self.last_sample_at = now;
        self.bytes_at_last_sample = current;

        Some(ProgressReport {
            label: self.label,
            filled_segments: filled_segments(current, total),
            percentage: current as f64 * 100.0 / total as f64,
            speed_mb_per_sec,
        })
    }
}
