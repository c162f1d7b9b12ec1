use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use uuid::Uuid;

use super::error::TranscodeError;
use super::job::{Job, JobInput};
use super::queue::JobQueue;
use crate::common::lifetime::Lifetime;

pub const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(60);
pub const THUMBNAIL_EXT: &str = "webp";

pub fn thumbnail_args(input: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-loglevel", "error", "-ss", "0", "-i"].map(String::from).to_vec();
    args.push(input.to_string_lossy().into_owned());
    args.extend(["-frames:v", "1", "-q:v", "2", "-vf", "scale=-2:360"].map(String::from));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Grabs the first frame of `input` as a WebP through the job queue.
///
/// The returned path is deleted when dropped.
pub async fn make_thumbnail(queue: &JobQueue, owner: Uuid, input: &Path) -> Result<TempPath, TranscodeError> {
    let output = tempfile::Builder::new()
        .prefix("thumb-")
        .suffix(&format!(".{THUMBNAIL_EXT}"))
        .tempfile()?
        .into_temp_path();

    let lifetime = Lifetime::new(THUMBNAIL_TIMEOUT);
    let (job, done) = Job::new(
        owner,
        input,
        JobInput::Args {
            args: thumbnail_args(input, &output),
            duration: None,
        },
        Box::new(tokio::io::sink()),
        &lifetime,
    );

    queue.enqueue(job)?;
    done.wait(&lifetime).await?;

    Ok(output)
}
