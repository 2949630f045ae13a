use std::time::{Duration, Instant};

use tracing::debug;

use crate::counters::CounterSnapshot;
use crate::metrics::{instant_rate, RateSample, SampleBuffer};

use super::config::EngineConfig;

/// Floor for the volatility denominator, in bytes/sec, so an idle link does not divide by zero.
pub const VOLATILITY_EPSILON: f64 = 0.1;
pub const VOLATILITY_THRESHOLD: f64 = 0.5;
pub const SHRINK_FACTOR: f64 = 0.8;
pub const GROW_FACTOR: f64 = 1.1;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DirectionRate {
    pub instant: f64,
    pub smoothed: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tick {
    pub download: DirectionRate,
    pub upload: DirectionRate,
    pub volatility: f64,
    /// Interval to sleep before the next poll, already clamped.
    pub next_interval: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// First snapshot; nothing to diff against yet.
    Baseline,
    /// New timestamp is not after the previous one. Baseline moved, no rates produced.
    ClockAnomaly,
    Tick(Tick),
}

pub fn volatility(smoothed: f64, instant: f64) -> f64 {
    (smoothed - instant).abs() / smoothed.max(VOLATILITY_EPSILON)
}

/// Per-poll state of the sampling loop: baselines, smoothing buffers and the adaptive interval.
pub struct Sampler {
    min_interval: Duration,
    max_interval: Duration,
    interval: Duration,
    baseline: Option<CounterSnapshot>,
    download: SampleBuffer,
    upload: SampleBuffer,
}

impl Sampler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            min_interval: config.min_interval,
            max_interval: config.max_interval,
            interval: config.clamp_interval(config.initial_interval),
            baseline: None,
            download: SampleBuffer::new(config.buffer_capacity, config.window),
            upload: SampleBuffer::new(config.buffer_capacity, config.window),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[cfg(test)]
    pub fn baseline(&self) -> Option<&CounterSnapshot> {
        self.baseline.as_ref()
    }

    #[cfg(test)]
    pub fn download_buffer(&self) -> &SampleBuffer {
        &self.download
    }

    pub fn observe(&mut self, snapshot: CounterSnapshot) -> Observation {
        let Some(previous) = self.baseline.replace(snapshot) else {
            return Observation::Baseline;
        };
        let dt = match snapshot.timestamp.checked_sub(previous.timestamp) {
            Some(dt) if !dt.is_zero() => dt,
            _ => {
                debug!(prev = ?previous.timestamp, now = ?snapshot.timestamp, "Clock anomaly, skipping tick");
                return Observation::ClockAnomaly;
            }
        };
        if snapshot.bytes_received < previous.bytes_received || snapshot.bytes_sent < previous.bytes_sent {
            debug!(
                prev_rx = previous.bytes_received,
                rx = snapshot.bytes_received,
                prev_tx = previous.bytes_sent,
                tx = snapshot.bytes_sent,
                "Counter reset"
            );
        }

        let now = snapshot.timestamp;
        let download = record(&mut self.download, now, instant_rate(previous.bytes_received, snapshot.bytes_received, dt));
        let upload = record(&mut self.upload, now, instant_rate(previous.bytes_sent, snapshot.bytes_sent, dt));

        let volatility = volatility(download.smoothed, download.instant);
        let next_interval = self.adapt(volatility);

        Observation::Tick(Tick { download, upload, volatility, next_interval })
    }

    /// Shrink the interval on a volatile signal, grow it when steady. Always clamped.
    pub fn adapt(&mut self, volatility: f64) -> Duration {
        let factor = if volatility > VOLATILITY_THRESHOLD { SHRINK_FACTOR } else { GROW_FACTOR };
        // Scale in f64: Duration::mul_f64 panics once the product overflows.
        let next = Duration::try_from_secs_f64(self.interval.as_secs_f64() * factor)
            .unwrap_or(self.max_interval)
            .clamp(self.min_interval, self.max_interval);
        if next != self.interval {
            debug!(volatility, from = ?self.interval, to = ?next, "Poll interval adjusted");
        }
        self.interval = next;
        next
    }
}

fn record(buffer: &mut SampleBuffer, now: Duration, instant: f64) -> DirectionRate {
    buffer.push(RateSample { timestamp: now, bytes_per_sec: instant });
    DirectionRate { instant, smoothed: buffer.mean_at(now) }
}

/// Enforces a minimum wall-clock gap between emitted updates.
pub struct DeliveryGate {
    spacing: Duration,
    last: Option<Instant>,
}

impl DeliveryGate {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing, last: None }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.spacing => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(secs: f64, rx: u64, tx: u64) -> CounterSnapshot {
        CounterSnapshot { timestamp: Duration::from_secs_f64(secs), bytes_received: rx, bytes_sent: tx }
    }

    fn tick(obs: Observation) -> Tick {
        match obs {
            Observation::Tick(t) => t,
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[test]
    fn first_snapshot_only_sets_baseline() {
        let mut s = Sampler::new(&EngineConfig::default());
        assert_eq!(s.observe(snap(0.0, 10, 10)), Observation::Baseline);
        assert_eq!(s.baseline().unwrap().bytes_received, 10);
        assert!(s.download_buffer().is_empty());
    }

    #[test]
    fn one_mebibyte_in_one_second() {
        let mut s = Sampler::new(&EngineConfig::default());
        s.observe(snap(0.0, 0, 0));
        let t = tick(s.observe(snap(1.0, 1_048_576, 0)));
        assert_eq!(t.download.instant, 1_048_576.0);
        assert_eq!(t.download.smoothed, 1_048_576.0);
        assert_eq!(t.upload.instant, 0.0);
    }

    #[test]
    fn counter_reset_yields_zero_and_moves_baseline() {
        let mut s = Sampler::new(&EngineConfig::default());
        s.observe(snap(0.0, 1000, 0));
        let t = tick(s.observe(snap(1.0, 500, 0)));
        assert_eq!(t.download.instant, 0.0);
        assert!(t.download.smoothed >= 0.0);
        assert_eq!(s.baseline().unwrap().bytes_received, 500);
        // next tick diffs against the new baseline
        let t = tick(s.observe(snap(2.0, 1500, 0)));
        assert_eq!(t.download.instant, 1000.0);
    }

    #[test]
    fn clock_anomaly_skips_but_advances_baseline() {
        let mut s = Sampler::new(&EngineConfig::default());
        s.observe(snap(5.0, 0, 0));
        assert_eq!(s.observe(snap(5.0, 100, 100)), Observation::ClockAnomaly);
        assert_eq!(s.observe(snap(4.0, 200, 200)), Observation::ClockAnomaly);
        assert!(s.download_buffer().is_empty());
        assert_eq!(s.baseline().unwrap().bytes_received, 200);
        let t = tick(s.observe(snap(6.0, 400, 200)));
        assert_eq!(t.download.instant, 100.0);
        assert_eq!(t.upload.instant, 0.0);
    }

    #[test]
    fn smoothing_averages_the_window() {
        let cfg = EngineConfig { buffer_capacity: 3, ..Default::default() };
        let mut s = Sampler::new(&cfg);
        s.observe(snap(0.0, 0, 0));
        s.observe(snap(1.0, 100, 0));
        s.observe(snap(2.0, 300, 0));
        let t = tick(s.observe(snap(3.0, 600, 0)));
        // instants 100, 200, 300
        assert_eq!(t.download.smoothed, 200.0);
        let t = tick(s.observe(snap(4.0, 1000, 0)));
        // 100 evicted by capacity: 200, 300, 400
        assert_eq!(t.download.smoothed, 300.0);
        assert!(s.download_buffer().len() <= 3);
    }

    #[test]
    fn rates_never_negative_for_arbitrary_sequences() {
        let mut s = Sampler::new(&EngineConfig::default());
        let seq: [(f64, u64, u64); 8] =
            [(0.0, 10, 10), (1.0, 5, 50), (1.5, 5, 10), (1.5, 90, 90), (3.0, 0, 0), (4.0, 1 << 40, 1), (4.5, 7, 7), (9.0, 8, 8)];
        for (t, rx, tx) in seq {
            if let Observation::Tick(tick) = s.observe(snap(t, rx, tx)) {
                for d in [tick.download, tick.upload] {
                    assert!(d.instant >= 0.0 && d.smoothed >= 0.0, "{d:?}");
                }
            }
        }
    }

    #[test]
    fn interval_stays_clamped_for_any_volatility() {
        let cfg = EngineConfig::default();
        let mut s = Sampler::new(&cfg);
        let pattern = [0.0, 10.0, 0.6, 0.4, 0.51, 100.0, 0.0, 0.0, 0.0, f64::INFINITY];
        for _ in 0..20 {
            for v in pattern {
                let next = s.adapt(v);
                assert!(next >= cfg.min_interval && next <= cfg.max_interval, "{next:?}");
            }
        }
        for _ in 0..50 {
            s.adapt(0.0);
        }
        assert_eq!(s.interval(), cfg.max_interval);
        for _ in 0..50 {
            s.adapt(1.0);
        }
        assert_eq!(s.interval(), cfg.min_interval);
    }

    #[test]
    fn huge_interval_bounds_do_not_overflow() {
        let huge = Duration::from_secs(17_000_000_000_000_000_000);
        let cfg = EngineConfig { min_interval: huge, initial_interval: huge, max_interval: huge, ..Default::default() };
        assert!(cfg.validate().is_ok());
        let mut s = Sampler::new(&cfg);
        assert_eq!(s.adapt(0.0), huge);
        assert_eq!(s.adapt(1.0), huge);
    }

    #[test]
    fn burst_shrinks_steady_grows() {
        let mut s = Sampler::new(&EngineConfig::default());
        let start = s.interval();
        assert!(s.adapt(0.9) < start);
        let mid = s.interval();
        assert!(s.adapt(0.1) > mid);
    }

    #[test]
    fn volatility_uses_epsilon_floor() {
        assert_eq!(volatility(0.0, 0.0), 0.0);
        assert_eq!(volatility(0.0, 1.0), 10.0);
        assert_eq!(volatility(100.0, 150.0), 0.5);
    }

    #[test]
    fn sudden_burst_shortens_next_poll() {
        let cfg = EngineConfig { buffer_capacity: 5, ..Default::default() };
        let mut s = Sampler::new(&cfg);
        s.observe(snap(0.0, 0, 0));
        s.observe(snap(1.0, 100, 0));
        let before = s.interval();
        let t = tick(s.observe(snap(2.0, 100 + 10_000, 0)));
        assert!(t.volatility > VOLATILITY_THRESHOLD);
        assert!(t.next_interval < before);
    }

    #[test]
    fn gate_enforces_spacing() {
        let mut gate = DeliveryGate::new(Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(gate.admit(t0));
        assert!(!gate.admit(t0 + Duration::from_millis(100)));
        assert!(!gate.admit(t0 + Duration::from_millis(499)));
        assert!(gate.admit(t0 + Duration::from_millis(500)));
        assert!(!gate.admit(t0 + Duration::from_millis(900)));
        assert!(gate.admit(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn zero_spacing_admits_everything() {
        let mut gate = DeliveryGate::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(gate.admit(t0));
        assert!(gate.admit(t0));
    }
}
