use std::{cmp::min, time::Duration};

#[derive(Clone, Debug, PartialEq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn to_header_value(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }
}

/// Delay schedule applied between attempts.
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// `0, base, 2*base, 4*base, ...` capped at `max`.
    Exponential { base: Duration, max: Duration },
    /// Explicit delays; retries past the end reuse the last entry.
    Schedule(Vec<Duration>),
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Exponential { base, max } => {
                if retry == 0 {
                    return Duration::ZERO;
                }
                let factor = 2_u32.saturating_pow(retry - 1);
                min(base.saturating_mul(factor), *max)
            }
            Backoff::Schedule(delays) => {
                let index = usize::try_from(retry).unwrap_or(usize::MAX);
                delays
                    .get(index)
                    .or_else(|| delays.last())
                    .copied()
                    .unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Which attempt budget a retried failure draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    /// The server answered badly or too slowly.
    Request,
    /// The transport was lost before any answer arrived.
    Offline,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Attempts allowed for [`RetryBudget::Offline`] failures, counted apart from the
    /// others. `None` applies `max_attempts`.
    pub offline_attempts: Option<u32>,
    pub backoff: Backoff,
    /// A failure arriving this long after the previous retry restarts the budget.
    pub reset_after: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            offline_attempts: None,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(200),
                max: Duration::from_secs(3),
            },
            reset_after: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            offline_attempts: None,
            backoff: Backoff::Exponential {
                base: base_delay,
                max: max_delay,
            },
            reset_after: None,
        }
    }

    pub fn with_schedule(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            offline_attempts: None,
            backoff: Backoff::Schedule(delays),
            reset_after: None,
        }
    }

    #[must_use]
    pub fn with_reset_after(mut self, window: Duration) -> Self {
        self.reset_after = Some(window);
        self
    }

    #[must_use]
    pub fn with_offline_attempts(mut self, attempts: u32) -> Self {
        self.offline_attempts = Some(attempts);
        self
    }

    pub fn attempts_for(&self, budget: RetryBudget) -> u32 {
        match budget {
            RetryBudget::Request => self.max_attempts,
            RetryBudget::Offline => self.offline_attempts.unwrap_or(self.max_attempts),
        }
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Max idle connections per host. Set to 0 to disable pooling.
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            pool_max_idle_per_host: 4,
        }
    }
}

impl NetOptions {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}
