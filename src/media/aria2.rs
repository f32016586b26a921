use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::regexp::ARIA2_READOUT;
use crate::transfer::io::{Progress, ProgressSender};

const CONNECTIONS_PER_SERVER: u8 = 4;
const SPLIT: u8 = 4;

/// Wrapper around the `aria2c` download accelerator.
#[derive(Debug, Clone)]
pub(crate) struct Aria2 {
    program: PathBuf,
}

impl Aria2 {
    pub(crate) fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, url: &str, dir: &Path, filename: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--continue=true")
            .arg(format!("--max-connection-per-server={}", CONNECTIONS_PER_SERVER))
            .arg(format!("--split={}", SPLIT))
            .arg("--summary-interval=1")
            .arg("--console-log-level=notice")
            .arg(format!("--dir={}", dir.display()))
            .arg(format!("--out={}", filename))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Downloads `url` into `dir/filename`, publishing the readouts aria2c
    /// prints on `progress`. A non-zero exit status is an error. Dropping the
    /// returned future kills the child.
    pub(crate) async fn download(
        &self,
        url: &str,
        dir: &Path,
        filename: &str,
        progress: ProgressSender,
    ) -> anyhow::Result<PathBuf> {
        log::info!("Downloading {} to {}", url, dir.join(filename).display());
        let mut child = self
            .command(url, dir, filename)
            .spawn()
            .with_context(|| format!("couldn't start {}", self.program.display()))?;
        let stdout = child.stdout.take().context("aria2c stdout is not captured")?;
        let stderr = child.stderr.take().context("aria2c stderr is not captured")?;

        let mut last_error: Option<String> = None;
        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                for segment in line.split('\r') {
                    if let Some(sample) = parse_readout(segment) {
                        let _ = progress.send(sample);
                    } else if segment.contains("ERROR") || segment.contains("errorCode") {
                        last_error = Some(segment.trim().to_string());
                    }
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            let mut text = String::new();
            BufReader::new(stderr).read_to_string(&mut text).await.map(|_| text)
        };
        let (stdout_result, stderr_result) = tokio::join!(read_stdout, read_stderr);
        if let Err(e) = stdout_result {
            log::warn!("Failed to read aria2c output: {}", e);
        }

        let status = child.wait().await.context("aria2c didn't finish")?;
        if !status.success() {
            let detail = last_error
                .or_else(|| {
                    stderr_result
                        .ok()
                        .map(|text| text.trim().to_string())
                        .filter(|text| !text.is_empty())
                })
                .unwrap_or_else(|| "no details".to_string());
            bail!("aria2c exited with {}: {}", status, detail);
        }
        Ok(dir.join(filename))
    }
}

fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let multiplier = match unit {
        "B" => 1u64,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        _ => return None,
    };
    Some((value * multiplier as f64) as u64)
}

/// Parses a console readout such as
/// `[#2089b0 400.0KiB/33.2MiB(1%) CN:1 DL:115.7KiB ETA:4m51s]`.
pub(crate) fn parse_readout(line: &str) -> Option<Progress> {
    let captures = ARIA2_READOUT.captures(line)?;
    let transferred = parse_size(&captures[1], &captures[2])?;
    let total = parse_size(&captures[3], &captures[4])?;
    Some(Progress {
        transferred: transferred.min(total),
        total,
    })
}
