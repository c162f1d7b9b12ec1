use std::path::PathBuf;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::TranscodeError;
use super::options::ProcessingOptions;
use crate::common::lifetime::Lifetime;
use crate::common::random::rand_str;

/// Where the encoder's standard output ends up: an HTTP body pipe, a file, or a sink.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

pub type JobResult = Result<(), TranscodeError>;

#[derive(Debug, Clone)]
pub enum JobInput {
    /// Arguments are built by the worker from user options.
    Options(ProcessingOptions),
    /// Precomputed encoder arguments. `duration` feeds progress percentages when known.
    Args { args: Vec<String>, duration: Option<f64> },
}

pub struct Job {
    pub id: String,
    pub owner_id: Uuid,
    pub input_path: PathBuf,
    pub input: JobInput,
    pub output: OutputSink,
    pub use_hw_accel: bool,
    pub lifetime: CancellationToken,
    completion: oneshot::Sender<JobResult>,
}

impl Job {
    pub fn new(
        owner_id: Uuid,
        input_path: impl Into<PathBuf>,
        input: JobInput,
        output: OutputSink,
        lifetime: &Lifetime,
    ) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();

        let job = Self {
            id: rand_str(5),
            owner_id,
            input_path: input_path.into(),
            input,
            output,
            use_hw_accel: false,
            lifetime: lifetime.token(),
            completion: tx,
        };

        (job, Completion { rx })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_hw_accel(mut self, enabled: bool) -> Self {
        self.use_hw_accel = enabled;
        self
    }

    /// Delivers the result and releases the output sink.
    pub(crate) fn complete(self, result: JobResult) {
        // The submitter may already have given up on the job.
        let _ = self.completion.send(result);
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("input_path", &self.input_path)
            .field("input", &self.input)
            .field("use_hw_accel", &self.use_hw_accel)
            .finish_non_exhaustive()
    }
}

/// Receiving half of a job's single-use completion signal.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<JobResult>,
}

impl Completion {
    /// Waits for the worker's result or the lifetime firing, whichever comes first.
    pub async fn wait(self, lifetime: &Lifetime) -> JobResult {
        tokio::select! {
            biased;
            result = self.rx => result.unwrap_or(Err(TranscodeError::Abandoned)),
            _ = lifetime.cancelled() => Err(TranscodeError::Cancelled),
        }
    }
}
