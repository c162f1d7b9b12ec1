use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::error::TranscodeError;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Anything that can report a clip's duration in seconds.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, path: &Path) -> impl Future<Output = Result<f64, TranscodeError>> + Send;
}

/// Runs `ffprobe` asking for the container duration only.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    binary: PathBuf,
    timeout: Duration,
}

impl Ffprobe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            "-i",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

impl DurationProbe for Ffprobe {
    async fn probe(&self, path: &Path) -> Result<f64, TranscodeError> {
        debug!(path = %path.display(), "probing duration");

        let output = tokio::time::timeout(self.timeout, self.command(path).output())
            .await
            .map_err(|_| TranscodeError::Probe(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| TranscodeError::Probe(format!("failed to run {}: {e}", self.binary.display())))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(TranscodeError::Probe(format!("{}: {}", output.status, stderr.trim())));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout), &stderr)
    }
}

/// Parses the bare duration `ffprobe` prints, e.g. `"63.520000\n"`.
pub fn parse_duration(stdout: &str, stderr: &str) -> Result<f64, TranscodeError> {
    let raw = stdout.trim();
    match raw.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(TranscodeError::Probe(format!(
            "unparseable duration {raw:?}: {}",
            stderr.trim()
        ))),
    }
}
