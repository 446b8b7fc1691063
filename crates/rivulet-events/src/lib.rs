//! Events a streaming session reports to its consumers.

#![forbid(unsafe_code)]

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Issue, IssueCode, RepresentationInfo, StreamEvent};
