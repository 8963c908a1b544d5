//! Step-wise exponential backoff for reachability probes

use std::time::Duration;

use rand::Rng;

use crate::config::ConnectivitySettings;

/// Consecutive failures spent at each backoff level before the interval doubles
pub const FAILURES_PER_STEP: u32 = 3;

/// Backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Interval used while online and for the first failures of a streak
    pub base_interval: Duration,
    /// Upper bound for any interval
    pub max_interval: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl From<&ConnectivitySettings> for BackoffConfig {
    fn from(settings: &ConnectivitySettings) -> Self {
        Self {
            base_interval: Duration::from_secs(settings.probe_interval_secs),
            max_interval: Duration::from_secs(settings.max_backoff_secs),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

/// Computes the pause between probes from the current failure streak.
///
/// The interval doubles once per [`FAILURES_PER_STEP`] consecutive failures
/// rather than on every failure: failures 1-3 wait `base`, 4-6 wait `2 * base`,
/// 7-9 wait `4 * base`, always capped at `max_interval`.
#[derive(Debug, Clone)]
pub struct ProbeBackoff {
    config: BackoffConfig,
}

impl ProbeBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Interval to sleep after a probe that left `consecutive_failures` in the streak
    pub fn interval(&self, consecutive_failures: u32) -> Duration {
        let steps = consecutive_failures.saturating_sub(1) / FAILURES_PER_STEP;
        let capped = 2u32
            .checked_pow(steps)
            .and_then(|factor| self.config.base_interval.checked_mul(factor))
            .unwrap_or(self.config.max_interval)
            .min(self.config.max_interval);

        if self.config.jitter_factor <= 0.0 {
            return capped;
        }

        let secs = capped.as_secs_f64();
        let jitter_range = secs * self.config.jitter_factor;
        let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((secs + jitter).max(0.0)).min(self.config.max_interval)
    }
}

impl Default for ProbeBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
