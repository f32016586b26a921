use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Duration reported by the probe. Probe failures never escape as errors,
/// they collapse into `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum MediaDuration {
    Seconds(f64),
    Unknown,
}

impl MediaDuration {
    pub(crate) fn parse(output: &str) -> Self {
        match output.trim().parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds > 0.0 => MediaDuration::Seconds(seconds),
            _ => MediaDuration::Unknown,
        }
    }

    /// Whole seconds as Telegram expects them.
    pub(crate) fn as_whole_seconds(&self) -> Option<u32> {
        match *self {
            MediaDuration::Seconds(seconds) => Some(seconds.round() as u32),
            MediaDuration::Unknown => None,
        }
    }
}

impl fmt::Display for MediaDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDuration::Seconds(seconds) => write!(f, "{:.2}s", seconds),
            MediaDuration::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MediaProbe {
    program: PathBuf,
}

impl MediaProbe {
    pub(crate) fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub(crate) async fn probe_duration(&self, path: &Path) -> MediaDuration {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let duration = match output {
            Ok(output) if output.status.success() => {
                MediaDuration::parse(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                log::warn!(
                    "{} exited with {} for {}: {}",
                    self.program.display(),
                    output.status,
                    path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                MediaDuration::Unknown
            }
            Err(e) => {
                log::warn!("Failed to run {}: {}", self.program.display(), e);
                MediaDuration::Unknown
            }
        };
        log::info!("Duration of {}: {}", path.display(), duration);
        duration
    }
}
