//! Per-track buffering engine for adaptive streaming.
//!
//! A [`StreamController`] owns one session: it loads the manifest, waits for the
//! [`PlaybackSurface`], then runs one [`BufferOrchestrator`] per track. Orchestrators download
//! segments through the [`SegmentPipeline`] at the quality the ABR manager picks and push
//! them into the surface's sinks; the [`EndOfStreamCoordinator`] signals the end once every
//! track is done. Everything observable comes out as [`StreamEvent`]s.

#![forbid(unsafe_code)]

mod config;
mod controller;
mod end_of_stream;
mod error;
mod loader;
mod orchestrator;
mod pipeline;
mod surface;

pub use config::{BufferOptions, EngineConfig, StartAt};
pub use controller::{ControllerState, StreamController, StreamHandle, start_position};
pub use end_of_stream::EndOfStreamCoordinator;
pub use error::{PipelineError, StreamError, StreamResult, SurfaceError};
pub use loader::{HttpManifestLoader, ManifestLoader, ManifestParser};
pub use orchestrator::{BufferOrchestrator, OrchestratorCommand, SessionParts, TrackReport};
pub use pipeline::{FetchedSegment, PassThrough, SegmentParser, SegmentPipeline, SegmentRequest};
pub use rivulet_events::StreamEvent;
#[cfg(test)]
pub use surface::MockPlaybackSurface;
pub use surface::{FrameCounters, PlaybackSurface, ReadyState};

/// Where components report events; the controller fans them out to subscribers.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<StreamEvent>;
