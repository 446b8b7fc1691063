use async_trait::async_trait;
use bytes::Bytes;

use crate::{RangeSet, SinkError, TimeRange};

/// What a chunk handed to the sink carries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChunkKind {
    /// Initialization data; occupies no time on the buffer timeline.
    Init,
    /// Media covering `range` once appended.
    Media { range: TimeRange },
}

#[derive(Clone, Debug)]
pub struct SinkChunk {
    pub data: Bytes,
    pub kind: ChunkKind,
}

impl SinkChunk {
    pub fn init(data: Bytes) -> Self {
        Self {
            data,
            kind: ChunkKind::Init,
        }
    }

    pub fn media(data: Bytes, range: TimeRange) -> Self {
        Self {
            data,
            kind: ChunkKind::Media { range },
        }
    }

    pub fn range(&self) -> Option<TimeRange> {
        match self.kind {
            ChunkKind::Init => None,
            ChunkKind::Media { range } => Some(range),
        }
    }
}

/// Single-operation-at-a-time buffer mutation capability of one track.
///
/// Implementations may reject a call made while another one is still running with
/// [`SinkError::Busy`]; [`crate::QueuedSink`] guarantees that never happens.
#[async_trait]
pub trait BufferSink: Send + Sync {
    async fn append(&self, chunk: SinkChunk) -> Result<(), SinkError>;

    async fn remove(&self, range: TimeRange) -> Result<(), SinkError>;

    /// What the sink actually holds right now.
    fn buffered(&self) -> RangeSet;
}
