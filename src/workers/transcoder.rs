use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::args::{apply_hwaccel, ArgumentBuilder, BuiltArgs};
use super::encoder::EncoderSettings;
use super::error::TranscodeError;
use super::job::{Job, JobInput};
use super::probe::Ffprobe;
use super::progress::ProgressStore;

/// Tail of the encoder's diagnostic output kept for failure reports.
const DIAGNOSTICS_CAP: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    Percent(f64),
    End,
    /// A `key=value` line the runner does not act on.
    Other,
}

enum Waited<T> {
    Done(T),
    Cancelled,
}

/// Runs one job's encoder process to completion.
#[derive(Debug, Clone)]
pub struct Transcoder {
    settings: Arc<EncoderSettings>,
    probe: Ffprobe,
    progress: ProgressStore,
}

impl Transcoder {
    pub fn new(settings: Arc<EncoderSettings>, progress: ProgressStore) -> Self {
        let probe = Ffprobe::new(&settings.ffprobe_path);
        Self { settings, probe, progress }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub async fn run(&self, job: &mut Job) -> Result<(), TranscodeError> {
        let lifetime = job.lifetime.clone();
        if lifetime.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        let resolved = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Err(TranscodeError::Cancelled),
            resolved = self.resolve(&job.input, &job.input_path, job.use_hw_accel) => resolved?,
        };
        let (args, duration) = resolved;

        debug!(job_id = %job.id, ?args, "spawning encoder");
        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("encoder stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("encoder stderr was not captured"))?;

        let output = &mut job.output;
        let copy = async move {
            let written = tokio::io::copy(&mut stdout, output).await?;
            output.flush().await?;
            Ok::<u64, io::Error>(written)
        };
        let scan = scan_progress(stderr, duration, &self.progress, job.owner_id, &job.id);

        // The scanner is dropped as soon as the copy fails.
        let streamed = tokio::select! {
            biased;
            _ = lifetime.cancelled() => Waited::Cancelled,
            joined = async { tokio::try_join!(copy, async { Ok::<_, io::Error>(scan.await) }) } => Waited::Done(joined),
        };
        let (written, diagnostics) = match streamed {
            Waited::Done(Ok(done)) => done,
            Waited::Done(Err(e)) => {
                warn!(job_id = %job.id, error = %e, "output sink failed, stopping encoder");
                kill_quietly(&mut child).await;
                return Err(TranscodeError::Streaming(e));
            }
            Waited::Cancelled => return terminate(&mut child, &job.id).await,
        };

        let waited = tokio::select! {
            biased;
            _ = lifetime.cancelled() => Waited::Cancelled,
            status = child.wait() => Waited::Done(status),
        };
        let status: ExitStatus = match waited {
            Waited::Done(status) => status?,
            Waited::Cancelled => return terminate(&mut child, &job.id).await,
        };

        if !status.success() {
            error!(
                job_id = %job.id,
                owner_id = %job.owner_id,
                %status,
                diagnostics = %diagnostics,
                "encoder failed"
            );
            return Err(TranscodeError::Encode {
                status: status.to_string(),
                diagnostics,
            });
        }

        info!(job_id = %job.id, bytes = written, "encoder finished");
        Ok(())
    }

    /// Final argument list plus the progress denominator, if known.
    ///
    /// Takes the job's parts: the output sink is not `Sync`, so a `&Job` must not live across the probe.
    async fn resolve(
        &self,
        input: &JobInput,
        input_path: &Path,
        use_hw_accel: bool,
    ) -> Result<(Vec<String>, Option<f64>), TranscodeError> {
        match input {
            JobInput::Options(opts) => {
                let BuiltArgs { args, duration } = ArgumentBuilder::new(&self.settings)
                    .build(opts, input_path, use_hw_accel, &self.probe)
                    .await?;
                Ok((args, Some(duration)))
            }
            JobInput::Args { args, duration } => {
                let mut args = args.clone();
                if let Some(hwaccel) = self.settings.hwaccel_for(use_hw_accel) {
                    apply_hwaccel(&mut args, hwaccel);
                }
                Ok((args, *duration))
            }
        }
    }
}

async fn terminate(child: &mut Child, job_id: &str) -> Result<(), TranscodeError> {
    warn!(job_id, "job cancelled, killing encoder");
    kill_quietly(child).await;
    Err(TranscodeError::Cancelled)
}

async fn kill_quietly(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "encoder already gone");
    }
}

/// Reads `key=value` progress lines until the encoder closes its side channel.
///
/// Everything else is kept as diagnostics. If `progress=end` never shows up the
/// record is still forced to 100 so pollers never stall below completion.
async fn scan_progress<R: AsyncRead + Unpin>(
    reader: R,
    duration: Option<f64>,
    progress: &ProgressStore,
    owner: Uuid,
    job_id: &str,
) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut diagnostics = String::new();
    let mut ended = false;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_progress_line(&line, duration) {
                Some(ProgressLine::End) => {
                    ended = true;
                    progress.update(owner, job_id, 100.0);
                }
                Some(ProgressLine::Percent(percent)) if !ended => progress.update(owner, job_id, percent),
                Some(_) => {}
                None => push_diagnostic(&mut diagnostics, &line),
            },
            Ok(None) => break,
            Err(e) => {
                push_diagnostic(&mut diagnostics, &format!("failed to read encoder output: {e}"));
                break;
            }
        }
    }

    if !ended {
        progress.update(owner, job_id, 100.0);
    }
    diagnostics
}

/// `None` for lines that are not `key=value` progress output.
pub fn parse_progress_line(line: &str, duration: Option<f64>) -> Option<ProgressLine> {
    let line = line.trim();
    let (key, value) = line.split_once('=')?;
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return None;
    }

    match key {
        "progress" if value == "end" => Some(ProgressLine::End),
        "out_time_ms" => {
            let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
                return Some(ProgressLine::Other);
            };
            match value.parse::<f64>() {
                Ok(micros) => Some(ProgressLine::Percent(
                    (micros / 1_000_000.0 / duration * 100.0).clamp(0.0, 100.0),
                )),
                Err(_) => Some(ProgressLine::Other),
            }
        }
        _ => Some(ProgressLine::Other),
    }
}

fn push_diagnostic(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');

    if buf.len() > DIAGNOSTICS_CAP {
        let mut cut = buf.len() - DIAGNOSTICS_CAP;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::lifetime::Lifetime;
    use crate::workers::encoder::SOFTWARE_ENCODER;
    use crate::workers::job::{Completion, OutputSink};
    use crate::workers::options::ProcessingOptions;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWrite};

    fn transcoder(ffmpeg: &str, ffprobe: &str) -> Transcoder {
        let settings = EncoderSettings {
            ffmpeg_path: ffmpeg.into(),
            ffprobe_path: ffprobe.into(),
            software_encoder: SOFTWARE_ENCODER.into(),
            hw: None,
            threads_per_job: 1,
        };
        Transcoder::new(Arc::new(settings), ProgressStore::new(Duration::from_secs(60)))
    }

    fn shell_job(script: &str, duration: Option<f64>, output: OutputSink, lifetime: &Lifetime) -> (Job, Completion) {
        Job::new(
            Uuid::new_v4(),
            "/dev/null",
            JobInput::Args {
                args: vec!["-c".into(), script.into()],
                duration,
            },
            output,
            lifetime,
        )
    }

    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away")))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn run_future_can_move_between_worker_threads() {
        fn assert_send<T: Send>(_: &T) {}

        let t = transcoder("sh", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_secs(5));
        let (mut job, _done) = shell_job("exit 0", None, Box::new(tokio::io::sink()), &lifetime);

        let running = t.run(&mut job);
        assert_send(&running);
    }

    #[test]
    fn out_time_is_microseconds() {
        assert_eq!(parse_progress_line("out_time_ms=5000000", Some(10.0)), Some(ProgressLine::Percent(50.0)));
        assert_eq!(parse_progress_line("out_time_ms=99000000", Some(10.0)), Some(ProgressLine::Percent(100.0)));
        assert_eq!(parse_progress_line("out_time_ms=-40", Some(10.0)), Some(ProgressLine::Percent(0.0)));
    }

    #[test]
    fn unusable_progress_lines_are_ignored() {
        assert_eq!(parse_progress_line("progress=end", None), Some(ProgressLine::End));
        assert_eq!(parse_progress_line("progress=continue", Some(1.0)), Some(ProgressLine::Other));
        assert_eq!(parse_progress_line("out_time_ms=N/A", Some(10.0)), Some(ProgressLine::Other));
        assert_eq!(parse_progress_line("out_time_ms=100", None), Some(ProgressLine::Other));
        assert_eq!(parse_progress_line("out_time_ms=100", Some(0.0)), Some(ProgressLine::Other));
        assert_eq!(parse_progress_line("[mp4 @ 0x5] moov atom not found", Some(1.0)), None);
        assert_eq!(parse_progress_line("Error opening input: x=y", Some(1.0)), None);
    }

    #[test]
    fn diagnostics_keep_only_the_tail() {
        let mut buf = String::new();
        let line = "x".repeat(1000);
        for _ in 0..100 {
            push_diagnostic(&mut buf, &line);
        }
        push_diagnostic(&mut buf, "last words");

        assert!(buf.len() <= DIAGNOSTICS_CAP);
        assert!(buf.ends_with("last words\n"));
    }

    #[tokio::test]
    async fn end_marker_is_final_regardless_of_later_lines() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let owner = Uuid::new_v4();
        store.begin(owner, "j1");
        let feed: &[u8] = b"out_time_ms=2000000\nprogress=end\nout_time_ms=1000000\nwarning: trailing\n";

        let diagnostics = scan_progress(feed, Some(10.0), &store, owner, "j1").await;

        assert_eq!(store.get(owner).unwrap().percent, 100.0);
        assert_eq!(diagnostics, "warning: trailing\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_stdout_and_reports_progress() {
        let t = transcoder("sh", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_secs(10));
        let (writer, mut reader) = tokio::io::duplex(64);
        let collect = tokio::spawn(async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.map(|_| out)
        });

        let script = "printf 'out_time_ms=5000000\\n' >&2; printf 'encoded-bytes'; printf 'progress=end\\n' >&2";
        let (mut job, _done) = shell_job(script, Some(10.0), Box::new(writer), &lifetime);
        let owner = job.owner_id;
        t.progress().begin(owner, &job.id);

        t.run(&mut job).await.unwrap();
        drop(job);

        assert_eq!(collect.await.unwrap().unwrap(), b"encoded-bytes");
        assert_eq!(t.progress().get(owner).unwrap().percent, 100.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_end_marker_still_reaches_100() {
        let t = transcoder("sh", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_secs(10));
        let (mut job, _done) = shell_job(
            "printf 'out_time_ms=1000000\\n' >&2",
            Some(10.0),
            Box::new(tokio::io::sink()),
            &lifetime,
        );
        t.progress().begin(job.owner_id, &job.id);

        t.run(&mut job).await.unwrap();

        assert_eq!(t.progress().get(job.owner_id).unwrap().percent, 100.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_diagnostics() {
        let t = transcoder("sh", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_secs(10));
        let (mut job, _done) = shell_job(
            "echo 'Invalid data found when processing input' >&2; exit 3",
            None,
            Box::new(tokio::io::sink()),
            &lifetime,
        );

        match t.run(&mut job).await {
            Err(TranscodeError::Encode { diagnostics, .. }) => {
                assert!(diagnostics.contains("Invalid data found"), "{diagnostics}");
            }
            other => panic!("expected encode failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn broken_sink_is_a_streaming_failure() {
        let t = transcoder("sh", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_secs(10));
        let (mut job, _done) = shell_job("printf data; exec sleep 30", None, Box::new(BrokenSink), &lifetime);

        let started = Instant::now();
        let result = t.run(&mut job).await;

        assert!(matches!(result, Err(TranscodeError::Streaming(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());

        let t = transcoder("sh", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_millis(500));
        let (mut job, _done) = shell_job(&script, None, Box::new(tokio::io::sink()), &lifetime);

        let started = Instant::now();
        let result = t.run(&mut job).await;

        assert!(matches!(result, Err(TranscodeError::Cancelled)), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "encoder {pid} survived cancellation");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_failure_happens_before_spawning() {
        let t = transcoder("/nonexistent/ffmpeg", "false");
        let lifetime = Lifetime::new(Duration::from_secs(10));
        let (mut job, _done) = Job::new(
            Uuid::new_v4(),
            "/tmp/input.mp4",
            JobInput::Options(ProcessingOptions {
                processing_speed: "fast".into(),
                ..Default::default()
            }),
            Box::new(tokio::io::sink()),
            &lifetime,
        );

        let result = t.run(&mut job).await;

        assert!(matches!(result, Err(TranscodeError::Probe(_))), "{result:?}");
    }

    #[tokio::test]
    async fn already_cancelled_job_never_starts() {
        let t = transcoder("/nonexistent/ffmpeg", "ffprobe");
        let lifetime = Lifetime::new(Duration::from_secs(10));
        lifetime.cancel();
        let (mut job, _done) = shell_job("exit 0", None, Box::new(tokio::io::sink()), &lifetime);

        assert!(matches!(t.run(&mut job).await, Err(TranscodeError::Cancelled)));
    }
}
