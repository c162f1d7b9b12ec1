use std::io;
use std::str::FromStr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::multipart::{Field, Multipart};
use futures_util::{future, stream, Stream, StreamExt};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::StartResponse;
use crate::common::lifetime::Lifetime;
use crate::common::random::rand_str;
use crate::common::upload::{save_field_to_temp, SavedUpload};
use crate::modules::file::dto::FileResponse;
use crate::modules::file::service::{FileError, FileResult, FileService};
use crate::state::AppState;
use crate::workers::job::{Job, JobInput};
use crate::workers::options::ProcessingOptions;
use crate::workers::progress::ProgressStore;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
const STREAM_BUFFER: usize = 64 * 1024;
const JOB_ID_LEN: usize = 5;

pub struct FfmpegService;

impl FfmpegService {
    /// Reserves a progress record for the caller. `None` while another job of theirs is live.
    pub fn start(progress: &ProgressStore, owner: Uuid) -> Option<StartResponse> {
        let job_id = rand_str(JOB_ID_LEN);
        progress.begin(owner, &job_id).then_some(StartResponse { job_id })
    }

    pub fn owns_job(progress: &ProgressStore, owner: Uuid, job_id: &str) -> bool {
        progress.get(owner).is_some_and(|r| r.job_id == job_id)
    }

    /// Progress of the caller's live job. `None` when they have nothing running.
    pub fn watch(progress: &ProgressStore, owner: Uuid, every: Duration) -> Option<impl Stream<Item = f64> + use<>> {
        progress.get(owner)?;
        Some(Self::progress_stream(progress.clone(), owner, every))
    }

    /// Samples the caller's progress until it reaches 100 or disappears.
    ///
    /// Always ends with a final `100.0` and clears the record.
    fn progress_stream(progress: ProgressStore, owner: Uuid, every: Duration) -> impl Stream<Item = f64> {
        let ticker = tokio::time::interval(every);

        stream::unfold(Some(ticker), move |ticker| {
            let progress = progress.clone();
            async move {
                let mut ticker = ticker?;
                ticker.tick().await;

                match progress.get(owner) {
                    Some(record) if record.percent < 100.0 => Some((record.percent, Some(ticker))),
                    _ => {
                        progress.remove(owner);
                        Some((100.0, None))
                    }
                }
            }
        })
    }

    /// Reads the `/process` form: one `file` field plus the processing options.
    pub async fn read_form(multipart: &mut Multipart, max_size: u64) -> FileResult<(SavedUpload, ProcessingOptions)> {
        let mut upload = None;
        let mut opts = ProcessingOptions::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| FileError::BadRequest(format!("Invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => upload = Some(save_field_to_temp(field, max_size).await?),
                "trimStart" => opts.trim_start = parse_field(field, &name).await?,
                "trimEnd" => opts.trim_end = parse_field(field, &name).await?,
                "targetSize" => opts.target_size_mb = parse_field(field, &name).await?,
                "losslessExport" => opts.lossless_export = parse_field(field, &name).await?,
                "processingSpeed" => opts.processing_speed = parse_field(field, &name).await?,
                "saveToCloud" => opts.save_to_cloud = parse_field(field, &name).await?,
                _ => {}
            }
        }

        let upload = upload.ok_or_else(|| FileError::BadRequest("Missing file field".to_string()))?;
        opts.validate_against(upload.size)?;

        Ok((upload, opts))
    }

    /// Starts the encode and returns a body that carries its output as it is produced.
    ///
    /// Dropping the body (client gone) cancels the job. A failure after the first bytes
    /// were sent aborts the body instead of ending it cleanly.
    pub fn stream(
        state: &AppState,
        owner: Uuid,
        job_id: String,
        upload: SavedUpload,
        opts: ProcessingOptions,
    ) -> FileResult<Body> {
        let (writer, reader) = tokio::io::duplex(STREAM_BUFFER);
        let caller = CancellationToken::new();
        let lifetime = Lifetime::merged(job_timeout(state), [caller.clone()]);

        let (job, done) = Job::new(owner, &*upload.path, JobInput::Options(opts), Box::new(writer), &lifetime);
        state.jobs.enqueue(job.with_id(job_id.clone()).with_hw_accel(true))?;
        info!(job_id = %job_id, owner_id = %owner, "streaming encode accepted");

        let abort = CancellationToken::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let failed = abort.clone();
        tokio::spawn(async move {
            // The input must outlive the encoder.
            let _upload = upload;
            let result = done.wait(&lifetime).await;
            if let Err(e) = &result {
                warn!(job_id = %job_id, error = %e, "streaming encode failed");
                failed.cancel();
            }
            let _ = outcome_tx.send(result);
        });

        let guard = caller.drop_guard();
        let bytes = ReaderStream::new(reader).take_until(abort.cancelled_owned());
        let tail = stream::once(async move {
            let _guard = guard;
            match outcome_rx.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(Err::<Bytes, _>(io::Error::other(e.to_string()))),
                Err(_) => Some(Err(io::Error::other("encoder result lost"))),
            }
        })
        .filter_map(future::ready);

        Ok(Body::from_stream(bytes.chain(tail)))
    }

    /// Encodes to a temp file and stores the result as one of the caller's files.
    pub async fn save(
        state: &AppState,
        owner: Uuid,
        job_id: String,
        upload: SavedUpload,
        opts: ProcessingOptions,
    ) -> FileResult<FileResponse> {
        let lifetime = Lifetime::new(job_timeout(state));
        let encoded = FileService::encode_to_temp(state, owner, &upload.path, opts, Some(job_id), &lifetime).await?;

        FileService::save_encoded(state, owner, &upload.file_name, &encoded).await
    }
}

async fn parse_field<T: FromStr>(field: Field<'_>, name: &str) -> FileResult<T> {
    let text = field
        .text()
        .await
        .map_err(|e| FileError::BadRequest(format!("Failed to read {name}: {e}")))?;

    text.trim()
        .parse()
        .map_err(|_| FileError::BadRequest(format!("Invalid value for {name}")))
}

fn job_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.ffmpeg.job_timeout_secs)
}
