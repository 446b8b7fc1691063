use thiserror::Error;

pub type BufferResult<T> = Result<T, BufferError>;

/// Failure reported by the raw buffer-mutation capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// No room left until something is evicted.
    #[error("sink is over capacity")]
    OverCapacity,
    /// Another operation is still running on the sink.
    #[error("sink is busy")]
    Busy,
    #[error("sink rejected the operation: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BufferError {
    #[error("invalid range: [{start}, {end})")]
    InvalidRange { start: f64, end: f64 },

    /// Append still over capacity after forced eviction.
    #[error("buffer full: {0}")]
    BufferFull(SinkError),

    /// Append rejected for a reason other than capacity.
    #[error("append failed: {0}")]
    AppendFailed(SinkError),

    #[error("remove failed: {0}")]
    RemoveFailed(SinkError),

    /// Forced eviction reached its floor window without freeing anything.
    #[error("nothing left to evict around {current_time}")]
    NothingToEvict { current_time: f64 },

    #[error("sink disposed")]
    Disposed,
}

impl BufferError {
    /// Errors after which the track cannot keep buffering.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BufferFull(_) | Self::AppendFailed(_))
    }
}
