use std::time::Duration;

use thiserror::Error;

use crate::units::UnitPreference;

/// Tunables for a [`SamplingEngine`](super::SamplingEngine). Fixed for the engine's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub initial_interval: Duration,
    pub buffer_capacity: usize,
    pub window: Duration,
    pub min_delivery_spacing: Duration,
    /// Sleep used after a failed counter read instead of the adaptive interval.
    pub fallback_interval: Duration,
    /// Consecutive read failures before a degraded notification goes out.
    pub degraded_after: u32,
    /// A read still pending after this long counts as a failure.
    pub read_timeout: Duration,
    pub channel_capacity: usize,
    pub unit: UnitPreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(2),
            initial_interval: Duration::from_secs(1),
            buffer_capacity: 5,
            window: Duration::from_secs(10),
            min_delivery_spacing: Duration::from_millis(500),
            fallback_interval: Duration::from_secs(1),
            degraded_after: 3,
            read_timeout: Duration::from_secs(2),
            channel_capacity: 64,
            unit: UnitPreference::Auto,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("min interval must be greater than zero")]
    ZeroMinInterval,
    #[error("interval bounds out of order: min {min:?}, initial {initial:?}, max {max:?}")]
    IntervalOrder {
        min: Duration,
        initial: Duration,
        max: Duration,
    },
    #[error("buffer capacity must be at least one sample")]
    ZeroCapacity,
    #[error("smoothing window must be greater than zero")]
    ZeroWindow,
    #[error("channel capacity must be at least one")]
    ZeroChannel,
    #[error("degraded threshold must be at least one failure")]
    ZeroDegradedThreshold,
    #[error("read timeout must be greater than zero")]
    ZeroReadTimeout,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval.is_zero() {
            return Err(ConfigError::ZeroMinInterval);
        }
        if self.min_interval > self.initial_interval || self.initial_interval > self.max_interval {
            return Err(ConfigError::IntervalOrder {
                min: self.min_interval,
                initial: self.initial_interval,
                max: self.max_interval,
            });
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannel);
        }
        if self.degraded_after == 0 {
            return Err(ConfigError::ZeroDegradedThreshold);
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }
        Ok(())
    }

    pub fn clamp_interval(&self, interval: Duration) -> Duration {
        interval.clamp(self.min_interval, self.max_interval)
    }
}
