#![forbid(unsafe_code)]

//! Per-track buffer state for the rivulet engine.
//!
//! - [`RangeSet`] / [`TimeRange`]: disjoint buffered intervals in seconds.
//! - [`SegmentBookkeeper`]: which segment produced which buffered range.
//! - [`QueuedSink`]: strictly ordered, one-at-a-time access to a [`BufferSink`].
//! - [`GarbageCollector`] and [`ForcedEviction`]: eviction around the playhead.

mod bookkeeper;
mod clock;
mod error;
mod gc;
mod queued;
mod range_set;
mod sink;

pub use crate::{
    bookkeeper::{BookkeptSegment, MAX_EDGE_SLACK, SegmentBookkeeper, SegmentInfo, edge_slack},
    clock::{ClockReceiver, ClockTick},
    error::{BufferError, BufferResult, SinkError},
    gc::{ForcedEviction, GarbageCollector, force_collect, ranges_outside},
    queued::{QueuedSink, SinkState, SinkStatus},
    range_set::{RangeSet, TimeRange},
    sink::{BufferSink, ChunkKind, SinkChunk},
};
