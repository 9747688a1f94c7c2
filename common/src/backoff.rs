use rand::Rng;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffOptions {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffOptions {
    pub fn from_millis(base: u64, max: u64) -> Self {
        Self {
            base: Duration::from_millis(base),
            max: Duration::from_millis(max),
        }
    }
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self::from_millis(1000, 30_000)
    }
}

/// Capped exponential backoff with full jitter: each delay is uniformly random
/// in `[0, step]`, where the step doubles per attempt up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    options: BackoffOptions,
    attempt: u32,
}

impl Backoff {
    pub fn new(options: BackoffOptions) -> Self {
        Self {
            options,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let step = self.step(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        jitter(step)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn step(&self, attempt: u32) -> Duration {
        // 2^16 * base is already far beyond any sane ceiling
        let factor = 1u32 << attempt.min(16);
        self.options
            .base
            .checked_mul(factor)
            .unwrap_or(self.options.max)
            .min(self.options.max)
    }
}

/// Uniformly random duration in `[0, max]`.
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }

    max.mul_f64(rand::thread_rng().gen::<f64>())
}

/// Uniformly random duration in `[min, max]`.
pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }

    min + jitter(max - min)
}
