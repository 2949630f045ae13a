// Counter sources that need no real network: a synthetic traffic generator
// for `watch --mock`, and a scripted replay for tests.

use std::time::{Duration, Instant};

use crate::counters::{CounterSnapshot, CounterSource, ReadError};

/// Generates steady traffic with a periodic burst so the adaptive interval has
/// something to react to.
pub struct SyntheticSource {
    origin: Instant,
    last: Duration,
    received: u64,
    sent: u64,
    base_rx_bps: f64,
    base_tx_bps: f64,
    burst_every: Duration,
    burst_len: Duration,
    burst_factor: f64,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: Duration::ZERO,
            received: 0,
            sent: 0,
            base_rx_bps: 256.0 * 1024.0,
            base_tx_bps: 24.0 * 1024.0,
            burst_every: Duration::from_secs(12),
            burst_len: Duration::from_secs(3),
            burst_factor: 12.0,
        }
    }

    fn in_burst(&self, at: Duration) -> bool {
        let every = self.burst_every.as_secs_f64();
        every > 0.0 && at.as_secs_f64() % every >= every - self.burst_len.as_secs_f64()
    }

    fn advance(&mut self, now: Duration) -> CounterSnapshot {
        let dt = now.saturating_sub(self.last).as_secs_f64();
        let factor = if self.in_burst(now) { self.burst_factor } else { 1.0 };
        self.received = self.received.wrapping_add((self.base_rx_bps * factor * dt) as u64);
        self.sent = self.sent.wrapping_add((self.base_tx_bps * dt) as u64);
        self.last = now;
        CounterSnapshot { timestamp: now, bytes_received: self.received, bytes_sent: self.sent }
    }
}

impl CounterSource for SyntheticSource {
    fn read(&mut self) -> Result<CounterSnapshot, ReadError> {
        let now = self.origin.elapsed();
        Ok(self.advance(now))
    }
}

/// Replays a fixed script of reads. Once exhausted it keeps returning the last
/// good snapshot, which the engine sees as a stalled clock and ignores.
#[cfg(test)]
pub struct ScriptedSource {
    script: std::collections::VecDeque<Result<CounterSnapshot, ReadError>>,
    last: Option<CounterSnapshot>,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(script: Vec<Result<CounterSnapshot, ReadError>>) -> Self {
        Self { script: script.into(), last: None }
    }
}

#[cfg(test)]
impl CounterSource for ScriptedSource {
    fn read(&mut self) -> Result<CounterSnapshot, ReadError> {
        match self.script.pop_front() {
            Some(Ok(snapshot)) => {
                self.last = Some(snapshot);
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => self.last.ok_or(ReadError::Parse { line: 0, reason: "script exhausted".into() }),
        }
    }
}
