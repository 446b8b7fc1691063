use rivulet_buffer::BufferError;
use rivulet_events::{Issue, IssueCode};
use rivulet_manifest::{ManifestError, TrackType};
use rivulet_net::NetError;
use thiserror::Error;

use crate::ReadyState;

/// Failure reported by the playback surface.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("surface not ready: {0:?}")]
    NotReady(ReadyState),
    #[error("surface closed")]
    Closed,
    #[error("surface rejected the call: {0}")]
    Rejected(String),
}

/// Failure of a single segment request, after its own retries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("segment parse failed: {0}")]
    Parse(String),
    #[error("request cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn code(&self) -> IssueCode {
        match self {
            Self::Net(error) if error.is_retryable() => IssueCode::TransientNetwork,
            Self::Net(NetError::RetryExhausted { .. }) => IssueCode::TransientNetwork,
            Self::Net(_) | Self::Cancelled => IssueCode::NonTransientNetwork,
            Self::Parse(_) => IssueCode::Parse,
        }
    }
}

/// Session-level error taxonomy.
///
/// [`StreamError::is_fatal`] decides between restarting the session and giving up.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error("{track} segment request failed: {source}")]
    Pipeline {
        track: TrackType,
        #[source]
        source: PipelineError,
    },

    #[error("{track} buffer error: {source}")]
    Buffer {
        track: TrackType,
        #[source]
        source: BufferError,
    },

    #[error("end of stream rejected: {0}")]
    EndOfStreamRejected(#[source] SurfaceError),

    #[error("no period contains starting position {position}")]
    StartingTimeNotFound { position: f64 },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("manifest fetch failed: {0}")]
    ManifestFetch(#[from] NetError),

    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("giving up after {attempts} session attempts: {source}")]
    UnrecoverableFailure {
        attempts: u32,
        #[source]
        source: Box<StreamError>,
    },

    #[error("stream disposed")]
    Disposed,
}

pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// Errors that end the session instead of restarting it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Buffer { source, .. } => source.is_fatal(),
            Self::EndOfStreamRejected(_)
            | Self::StartingTimeNotFound { .. }
            | Self::UnrecoverableFailure { .. }
            | Self::Disposed => true,
            Self::Pipeline { .. } | Self::Manifest(_) | Self::ManifestFetch(_) | Self::Surface(_) => {
                false
            }
        }
    }

    pub fn track(&self) -> Option<TrackType> {
        match self {
            Self::Pipeline { track, .. } | Self::Buffer { track, .. } => Some(*track),
            Self::UnrecoverableFailure { source, .. } => source.track(),
            _ => None,
        }
    }

    pub fn code(&self) -> IssueCode {
        match self {
            Self::Pipeline { source, .. } => source.code(),
            Self::Buffer { source, .. } => match source {
                BufferError::BufferFull(_) => IssueCode::BufferFull,
                _ => IssueCode::BufferAppend,
            },
            Self::EndOfStreamRejected(_) => IssueCode::EndOfStreamRejected,
            Self::StartingTimeNotFound { .. } => IssueCode::StartingTimeNotFound,
            Self::Manifest(_) | Self::ManifestFetch(_) => IssueCode::Manifest,
            Self::Surface(_) | Self::Disposed => IssueCode::Surface,
            Self::UnrecoverableFailure { .. } => IssueCode::Unrecoverable,
        }
    }

    pub fn to_issue(&self) -> Issue {
        Issue::new(self.code(), self.track(), self.to_string())
    }
}
