/// Convenience alias used by all fallible rayfleet APIs.
pub type RayfleetResult<T> = Result<T, RayfleetError>;

/// Error type shared across the controller.
///
/// Shard-level failures (`Transport`, `Worker`) are recovered inside the
/// dispatcher by re-queueing; the remaining kinds abort the job.
#[derive(thiserror::Error, Debug)]
pub enum RayfleetError {
    /// Invalid configuration or provider validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// RPC I/O or wire deserialization failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure reported by a worker, including protocol violations.
    #[error("worker error: {0}")]
    Worker(String),

    /// Malformed tile, image, or job input data.
    #[error("codec error: {0}")]
    Codec(String),

    /// Programmer error (e.g. retrieving frames from an incomplete collector).
    #[error("contract violation: {0}")]
    Contract(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RayfleetError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }

    /// Whether the dispatcher may recover from this error by re-queueing the
    /// shard on another endpoint.
    pub fn is_shard_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Worker(_))
    }
}
