use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Admission rejected: every worker is busy and the buffer is full.
    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,

    #[error("invalid processing options: {0}")]
    InvalidOptions(String),

    #[error("failed to probe video duration: {0}")]
    Probe(String),

    /// The encoder exited unsuccessfully. `diagnostics` holds its side-channel output.
    #[error("encoder exited with {status}")]
    Encode { status: String, diagnostics: String },

    #[error("failed to stream encoder output: {0}")]
    Streaming(#[source] std::io::Error),

    #[error("job was cancelled or timed out")]
    Cancelled,

    #[error("worker dropped the job without reporting a result")]
    Abandoned,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
