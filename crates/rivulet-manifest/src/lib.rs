//! Manifest model consumed by the buffering engine.
//!
//! Manifest retrieval and parsing live elsewhere; this crate only holds the normalized,
//! read-only shape the engine navigates: periods, adaptations, representations and
//! their segment indexes.

#![forbid(unsafe_code)]

mod error;
mod index;
mod model;

pub use crate::{
    error::{ManifestError, ManifestResult},
    index::{ByteRange, InitSegment, Segment, SegmentIndex, TemplateIndex, TimelineIndex},
    model::{Adaptation, Manifest, Period, Representation, TrackType},
};
