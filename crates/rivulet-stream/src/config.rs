use std::time::Duration;

use rivulet_abr::AbrOptions;
use rivulet_net::RetryPolicy;
use tokio_util::sync::CancellationToken;

/// Buffering goals, in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferOptions {
    pub wanted_buffer_ahead: f64,
    pub max_buffer_ahead: f64,
    pub max_buffer_behind: f64,
    /// Smallest keep-window forced eviction may shrink to.
    pub gc_floor: f64,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            wanted_buffer_ahead: 30.0,
            max_buffer_ahead: f64::INFINITY,
            max_buffer_behind: 60.0,
            gc_floor: 2.0,
        }
    }
}

impl BufferOptions {
    #[must_use]
    pub fn with_wanted_buffer_ahead(mut self, seconds: f64) -> Self {
        self.wanted_buffer_ahead = seconds;
        self
    }

    #[must_use]
    pub fn with_max_buffer_ahead(mut self, seconds: f64) -> Self {
        self.max_buffer_ahead = seconds;
        self
    }

    #[must_use]
    pub fn with_max_buffer_behind(mut self, seconds: f64) -> Self {
        self.max_buffer_behind = seconds;
        self
    }
}

/// Where playback starts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum StartAt {
    /// Start of the first period.
    #[default]
    Beginning,
    /// Absolute presentation time.
    Position(f64),
    /// Distance before the end of the content.
    FromEnd(f64),
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub abr: AbrOptions,
    pub buffer: BufferOptions,
    /// Retries of a single segment request. Lost connections count against its
    /// `offline_attempts`, other transient failures against `max_attempts`.
    pub segment_retry: RetryPolicy,
    /// Bound on one segment request attempt.
    pub request_timeout: Duration,
    /// Restarts of the whole initialize-and-run cycle.
    pub session_retry: RetryPolicy,
    /// Retries of the end-of-stream signal.
    pub end_of_stream_retry: RetryPolicy,
    pub start_at: StartAt,
    /// How often the playback clock is sampled.
    pub clock_interval: Duration,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    /// Parent token; cancelling it disposes the session.
    pub cancel: Option<CancellationToken>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            abr: AbrOptions::default(),
            buffer: BufferOptions::default(),
            segment_retry: RetryPolicy::new(4, Duration::from_millis(200), Duration::from_secs(3))
                .with_offline_attempts(4),
            request_timeout: Duration::from_secs(10),
            session_retry: RetryPolicy::new(3, Duration::from_millis(250), Duration::from_secs(5))
                .with_reset_after(Duration::from_secs(60)),
            end_of_stream_retry: RetryPolicy::new(
                10,
                Duration::from_millis(100),
                Duration::from_secs(2),
            ),
            start_at: StartAt::Beginning,
            clock_interval: Duration::from_millis(250),
            event_capacity: 256,
            cancel: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.abr = abr;
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_segment_retry(mut self, policy: RetryPolicy) -> Self {
        self.segment_retry = policy;
        self
    }

    /// Attempts allowed per segment while the network is unreachable.
    #[must_use]
    pub fn with_offline_retry(mut self, attempts: u32) -> Self {
        self.segment_retry.offline_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_retry(mut self, policy: RetryPolicy) -> Self {
        self.session_retry = policy;
        self
    }

    #[must_use]
    pub fn with_end_of_stream_retry(mut self, policy: RetryPolicy) -> Self {
        self.end_of_stream_retry = policy;
        self
    }

    #[must_use]
    pub fn with_start_at(mut self, start_at: StartAt) -> Self {
        self.start_at = start_at;
        self
    }

    #[must_use]
    pub fn with_clock_interval(mut self, interval: Duration) -> Self {
        self.clock_interval = interval;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
