use std::{collections::HashMap, time::Duration};

use rivulet_manifest::TrackType;

/// Identifies one in-flight segment request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Telemetry of one completed request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NetworkMetric {
    /// Media duration carried by the segment, seconds.
    pub segment_duration: f64,
    /// Wall-clock time the transfer took.
    pub request_duration: Duration,
    pub size_bytes: u64,
}

impl NetworkMetric {
    /// Observed throughput, bits per second.
    #[expect(clippy::cast_precision_loss, reason = "byte counts are far below 2^52")]
    pub fn bits_per_second(&self) -> f64 {
        let secs = self.request_duration.as_secs_f64().max(0.000_5);
        self.size_bytes as f64 * 8.0 / secs
    }
}

/// Partial progress of an in-flight request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequestProgress {
    pub bytes_received: u64,
    pub elapsed: Duration,
}

#[derive(Clone, Debug)]
pub struct AbrOptions {
    /// Fraction of the estimated bandwidth a representation may use.
    pub safety_factor: f64,
    /// Dropped/decoded frame ratio above which video steps one representation down.
    pub dropped_frames_threshold: f64,
    pub fast_half_life: f64,
    pub slow_half_life: f64,
    /// Samples smaller than this are ignored by the estimator.
    pub min_sample_bytes: u64,
    /// Estimate used before the first sample of a track.
    pub initial_bitrates: HashMap<TrackType, u64>,
    pub manual_bitrates: HashMap<TrackType, u64>,
    pub max_auto_bitrates: HashMap<TrackType, u64>,
    /// Effective pixel width of the rendering surface.
    pub limit_width: Option<u32>,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            safety_factor: 0.9,
            dropped_frames_threshold: 0.1,
            fast_half_life: 2.0,
            slow_half_life: 10.0,
            min_sample_bytes: 16_000,
            initial_bitrates: HashMap::new(),
            manual_bitrates: HashMap::new(),
            max_auto_bitrates: HashMap::new(),
            limit_width: None,
        }
    }
}

impl AbrOptions {
    #[must_use]
    pub fn with_safety_factor(mut self, factor: f64) -> Self {
        self.safety_factor = factor;
        self
    }

    #[must_use]
    pub fn with_initial_bitrate(mut self, track: TrackType, bitrate: u64) -> Self {
        self.initial_bitrates.insert(track, bitrate);
        self
    }

    #[must_use]
    pub fn with_manual_bitrate(mut self, track: TrackType, bitrate: u64) -> Self {
        self.manual_bitrates.insert(track, bitrate);
        self
    }

    #[must_use]
    pub fn with_max_auto_bitrate(mut self, track: TrackType, bitrate: u64) -> Self {
        self.max_auto_bitrates.insert(track, bitrate);
        self
    }

    #[must_use]
    pub fn with_limit_width(mut self, width: u32) -> Self {
        self.limit_width = Some(width);
        self
    }
}
