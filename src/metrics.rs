use std::collections::VecDeque;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RateSample {
    pub timestamp: Duration,
    pub bytes_per_sec: f64,
}

/// Instantaneous rate between two cumulative readings.
///
/// A counter that went backwards (adapter reset, wrap) reads as zero traffic.
/// Callers must have rejected a non-positive `dt` already.
pub fn instant_rate(previous: u64, current: u64, dt: Duration) -> f64 {
    let secs = dt.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    match current.checked_sub(previous) {
        Some(diff) => diff as f64 / secs,
        None => 0.0,
    }
}

/// Trailing window of rate samples, bounded both by count and by age.
pub struct SampleBuffer {
    capacity: usize,
    window: Duration,
    samples: VecDeque<RateSample>,
}

impl SampleBuffer {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample and evict, oldest first, anything past capacity or
    /// older than the window measured from the new sample's timestamp.
    pub fn push(&mut self, sample: RateSample) {
        self.samples.push_back(RateSample {
            bytes_per_sec: sample.bytes_per_sec.max(0.0),
            ..sample
        });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.evict_older_than(sample.timestamp);
    }

    pub fn evict_older_than(&mut self, now: Duration) {
        while let Some(front) = self.samples.front() {
            if age(front, now) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Unweighted mean over samples no older than the window at `now`; zero when none qualify.
    pub fn mean_at(&self, now: Duration) -> f64 {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|s| age(s, now) <= self.window)
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.bytes_per_sec, n + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &RateSample> {
        self.samples.iter()
    }
}

fn age(sample: &RateSample, now: Duration) -> Duration {
    now.saturating_sub(sample.timestamp)
}
