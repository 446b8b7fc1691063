//! Deterministic PRNG for reproducible randomized tests.

/// xorshift64; a fixed seed replays the same sequence on every run.
pub struct Xorshift64(u64);

impl Xorshift64 {
    /// `seed` must be non-zero.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Uniform in `[0, 1)`.
    #[expect(clippy::cast_precision_loss, reason = "53-bit mantissa is the point")]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1_u64 << 53) as f64
    }

    /// Uniform in `[min, max)`.
    pub fn range_f64(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.next_f64()
    }

    /// A time rounded to a quarter second in `[min, max)`, so generated ranges share edges.
    pub fn time(&mut self, min: f64, max: f64) -> f64 {
        (self.range_f64(min, max) * 4.0).floor() / 4.0
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }
}
