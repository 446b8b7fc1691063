#![forbid(unsafe_code)]

//! Re-export session events from rivulet-events.

pub use rivulet_events::{EventBus, Issue, IssueCode, RepresentationInfo, StreamEvent};
