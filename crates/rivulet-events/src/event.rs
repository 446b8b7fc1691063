use std::fmt;

use rivulet_manifest::{Representation, TrackType};

/// Stable classification of an engine failure, shared by warnings and fatal errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueCode {
    /// Retryable transfer failure (timeout, 5xx, connection loss).
    TransientNetwork,
    /// Transfer failure that is never retried (4xx, bad range).
    NonTransientNetwork,
    /// Downloaded data could not be parsed.
    Parse,
    /// Sink still over capacity after forced eviction.
    BufferFull,
    /// Sink rejected an append for any other reason.
    BufferAppend,
    /// Surface kept refusing the end-of-stream signal.
    EndOfStreamRejected,
    /// No period covers the requested starting position.
    StartingTimeNotFound,
    /// Manifest could not be obtained or is unusable.
    Manifest,
    /// Playback surface failed outside of buffer operations.
    Surface,
    /// Session-level retries are exhausted.
    Unrecoverable,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::NonTransientNetwork => "NON_TRANSIENT_NETWORK",
            Self::Parse => "PARSE_ERROR",
            Self::BufferFull => "BUFFER_FULL",
            Self::BufferAppend => "BUFFER_APPEND_ERROR",
            Self::EndOfStreamRejected => "END_OF_STREAM_REJECTED",
            Self::StartingTimeNotFound => "MEDIA_STARTING_TIME_NOT_FOUND",
            Self::Manifest => "MANIFEST_ERROR",
            Self::Surface => "SURFACE_ERROR",
            Self::Unrecoverable => "UNRECOVERABLE",
        }
    }
}

/// A warning or fatal error as seen by consumers.
#[derive(Clone, Debug, PartialEq)]
pub struct Issue {
    pub code: IssueCode,
    pub track: Option<TrackType>,
    pub message: String,
}

impl Issue {
    pub fn new(code: IssueCode, track: Option<TrackType>, message: impl Into<String>) -> Self {
        Self {
            code,
            track,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.track {
            Some(track) => write!(f, "[{}] {}: {}", self.code.as_str(), track, self.message),
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

/// Summary of a chosen representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepresentationInfo {
    pub id: String,
    pub bitrate: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<&Representation> for RepresentationInfo {
    fn from(r: &Representation) -> Self {
        Self {
            id: r.id.clone(),
            bitrate: r.bitrate,
            width: r.width,
            height: r.height,
        }
    }
}

/// Ordered events emitted by a streaming session.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Manifest obtained and normalized.
    ManifestReady {
        manifest_id: String,
        periods: usize,
        duration: Option<f64>,
    },
    /// All track pipelines are running.
    Loaded,
    BitrateChanged {
        track: TrackType,
        representation: RepresentationInfo,
    },
    /// Playhead is outside the buffered ranges of `track`.
    Stalled { track: TrackType, position: f64 },
    PeriodChanged { period_id: String, start: f64 },
    /// Buffered hole with no segment to fill it; `next_time` is where data resumes.
    Discontinuity {
        track: TrackType,
        gap_start: f64,
        next_time: f64,
    },
    Warning(Issue),
    Ended,
    FatalError(Issue),
}

impl StreamEvent {
    /// `true` for events after which the session emits nothing else.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FatalError(_))
    }
}
