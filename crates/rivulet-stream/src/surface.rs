use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rivulet_buffer::BufferSink;
use rivulet_manifest::{Representation, TrackType};

use crate::SurfaceError;

/// Readiness of the playback surface, as seen by end-of-stream signaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Not attached, or detached.
    Closed,
    /// Accepting data.
    Open,
    /// End of stream was signaled.
    Ended,
}

/// Cumulative frame counters of the rendering surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub decoded: u64,
    pub dropped: u64,
}

/// The decoder/renderer the engine feeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlaybackSurface: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Resolves once the surface is [`ReadyState::Open`].
    async fn wait_ready(&self) -> Result<(), SurfaceError>;

    fn set_duration(&self, duration: f64) -> Result<(), SurfaceError>;

    /// Buffer-mutation capability for `track`, initialized for `representation`'s codec.
    fn create_sink(
        &self,
        track: TrackType,
        representation: &Representation,
    ) -> Result<Arc<dyn BufferSink>, SurfaceError>;

    fn current_time(&self) -> f64;

    fn is_seeking(&self) -> bool;

    fn seek(&self, time: f64);

    /// `None` when the surface renders no video.
    fn frame_counters(&self) -> Option<FrameCounters>;

    fn signal_end(&self) -> Result<(), SurfaceError>;
}
