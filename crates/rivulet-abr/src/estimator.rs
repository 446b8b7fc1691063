#[cfg(test)]
use mockall::automock;

use crate::{AbrOptions, NetworkMetric};

/// Bandwidth estimation strategy.
///
/// Allows testing `AbrManager` with mock estimators.
#[cfg_attr(test, automock)]
pub trait Estimator: Send {
    /// Estimated bandwidth in bits per second, `None` before any usable sample.
    fn estimate_bps(&self) -> Option<u64>;

    fn push_metric(&mut self, metric: &NetworkMetric);
}

/// Dual EWMA over completed requests; the lower of the fast and slow averages wins.
///
/// Samples are weighted by their transfer time, so long transfers of large segments
/// dominate short noisy ones.
#[derive(Clone, Debug)]
pub struct ThroughputEstimator {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    min_sample_bytes: u64,
    bytes_sampled: u64,
}

impl ThroughputEstimator {
    pub fn new(options: &AbrOptions) -> Self {
        Self {
            fast_ewma: Ewma::new(options.fast_half_life),
            slow_ewma: Ewma::new(options.slow_half_life),
            min_sample_bytes: options.min_sample_bytes,
            bytes_sampled: 0,
        }
    }

    pub fn bytes_sampled(&self) -> u64 {
        self.bytes_sampled
    }
}

impl Estimator for ThroughputEstimator {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "estimate is positive and far below u64::MAX"
    )]
    fn estimate_bps(&self) -> Option<u64> {
        let est = self
            .fast_ewma
            .get_estimate()
            .min(self.slow_ewma.get_estimate());
        (est > 0.0).then(|| est.round() as u64)
    }

    fn push_metric(&mut self, metric: &NetworkMetric) {
        if metric.size_bytes < self.min_sample_bytes {
            return;
        }
        let bps = metric.bits_per_second();
        let weight_secs = metric.request_duration.as_secs_f64().max(0.000_5);

        self.fast_ewma.add_sample(weight_secs, bps);
        self.slow_ewma.add_sample(weight_secs, bps);
        self.bytes_sampled = self.bytes_sampled.saturating_add(metric.size_bytes);
    }
}

#[derive(Clone, Debug)]
struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life_secs.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add_sample(&mut self, weight: f64, val: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.last_estimate = val * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight.max(0.0);
    }

    fn get_estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            0.0
        } else {
            // Undo the bias towards the zero starting value.
            let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
            self.last_estimate / zero_factor.max(1e-6)
        }
    }
}
