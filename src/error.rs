use thiserror::Error;

/// Errors surfaced by the download pipeline.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Missing client or invalid configuration at execute time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport failure during the probe or a worker fetch.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an unusable status code.
    #[error("remote returned status {0}")]
    Remote(reqwest::StatusCode),

    /// Positional write or seek failure on the sink.
    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),

    /// The instance state file could not be written or serialized.
    /// Unreadable state files are not fatal; they are discarded on load.
    #[error("instance state error: {0}")]
    Checkpoint(String),

    /// User-initiated termination. The instance state is kept for resume.
    #[error("download cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        DownloadError::Network(e.to_string())
    }
}
