use super::error::RetryClass;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter is drawn uniformly from `[jitter_min, jitter_max)` times the base delay.
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_min: 0.1,
            jitter_max: 1.0,
            jitter: true,
        }
    }
}

/// Computes the sleep between attempts for each retry class.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before the attempt following zero-based `attempt`, or `None` when
    /// the class is not retried.
    pub fn delay_for(&self, class: RetryClass, attempt: u32) -> Option<Duration> {
        let delay = match class {
            RetryClass::ExponentialBackoff => self.exponential(attempt),
            RetryClass::LinearBackoff => self.linear(attempt),
            RetryClass::NonRetryable => return None,
        };
        Some(delay.min(self.config.max_delay))
    }

    /// `base * 2^attempt + base * uniform(jitter_min, jitter_max)`
    fn exponential(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let factor = 2f64.powi(attempt.min(16) as i32);
        Duration::from_secs_f64(base * factor + base * self.jitter())
    }

    /// `base * 0.5 * (attempt + 1)`
    fn linear(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        Duration::from_secs_f64(base * 0.5 * (attempt as f64 + 1.0))
    }

    fn jitter(&self) -> f64 {
        if !self.config.jitter || self.config.jitter_max <= self.config.jitter_min {
            return 0.0;
        }
        rand::thread_rng().gen_range(self.config.jitter_min..self.config.jitter_max)
    }
}
