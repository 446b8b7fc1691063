//! Adaptive bitrate selection.
//!
//! [`AbrManager`] keeps one context per track: a bandwidth [`Estimator`] fed by completed
//! requests, the set of in-flight requests with their progress, and user constraints
//! (manual bitrate, auto-max bitrate, viewport width). Orchestrators ask it for a
//! representation on each loop iteration.
//!
//! ```rust
//! use rivulet_abr::{AbrManager, AbrOptions, NetworkMetric};
//! use rivulet_manifest::TrackType;
//! use std::time::Duration;
//!
//! let abr = AbrManager::new(AbrOptions::default());
//! abr.add_metric(
//!     TrackType::Video,
//!     NetworkMetric {
//!         segment_duration: 4.0,
//!         request_duration: Duration::from_secs(1),
//!         size_bytes: 75_000,
//!     },
//! );
//! assert_eq!(abr.estimate(TrackType::Video), Some(600_000));
//! ```

#![forbid(unsafe_code)]

mod estimator;
mod manager;
mod types;

pub use estimator::{Estimator, ThroughputEstimator};
pub use manager::{AbrDecision, AbrManager, AbrReason};
pub use types::{AbrOptions, NetworkMetric, RequestId, RequestProgress};
