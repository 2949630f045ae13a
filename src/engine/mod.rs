pub mod config;
mod reader;
pub mod sampler;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::counters::CounterSource;
use crate::units::{DisplayUnit, Reading, UnitPreference};

pub use config::{ConfigError, EngineConfig};
use reader::TimedReader;
use sampler::{DeliveryGate, Observation, Sampler, Tick};

/// One smoothed result handed to the consumer.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct RateUpdate {
    pub download_rate: f64,
    pub download_unit: DisplayUnit,
    pub upload_rate: f64,
    pub upload_unit: DisplayUnit,
    pub elapsed_secs: f64,
    pub download_bps: f64,
    pub upload_bps: f64,
}

impl RateUpdate {
    fn from_tick(tick: &Tick, unit: UnitPreference, elapsed: Duration) -> Self {
        let down = Reading::from_bytes_per_sec(tick.download.smoothed, unit);
        let up = Reading::from_bytes_per_sec(tick.upload.smoothed, unit);
        Self {
            download_rate: down.value,
            download_unit: down.unit,
            upload_rate: up.value,
            upload_unit: up.unit,
            elapsed_secs: elapsed.as_secs_f64(),
            download_bps: tick.download.smoothed,
            upload_bps: tick.upload.smoothed,
        }
    }

    pub fn download(&self) -> Reading {
        Reading { value: self.download_rate, unit: self.download_unit }
    }

    pub fn upload(&self) -> Reading {
        Reading { value: self.upload_rate, unit: self.upload_unit }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    Degraded { consecutive_failures: u32, last_error: String },
    Recovered { after_failures: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

fn decode_state(raw: u8) -> EngineState {
    match raw {
        RUNNING => EngineState::Running,
        STOPPING => EngineState::Stopping,
        _ => EngineState::Idle,
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("spawning engine threads")]
    Spawn(#[source] std::io::Error),
}

type SharedSource = Arc<Mutex<Box<dyn CounterSource>>>;

struct Worker {
    handle: JoinHandle<()>,
    // Dropping this disconnects the loop's stop receiver and wakes its sleep.
    stop_tx: channel::Sender<()>,
}

/// Background sampler: polls a [`CounterSource`], smooths the deltas and
/// publishes [`RateUpdate`]s over a bounded channel.
pub struct SamplingEngine {
    config: EngineConfig,
    state: Arc<AtomicU8>,
    source: SharedSource,
    worker: Mutex<Option<Worker>>,
    updates: (channel::Sender<RateUpdate>, channel::Receiver<RateUpdate>),
    health: (channel::Sender<HealthEvent>, channel::Receiver<HealthEvent>),
}

impl SamplingEngine {
    pub fn new(config: EngineConfig, source: impl CounterSource + 'static) -> Result<Self, ConfigError> {
        config.validate()?;
        let updates = channel::bounded(config.channel_capacity);
        let health = channel::bounded(config.channel_capacity);
        let source: Box<dyn CounterSource> = Box::new(source);
        Ok(Self {
            config,
            state: Arc::new(AtomicU8::new(IDLE)),
            source: Arc::new(Mutex::new(source)),
            worker: Mutex::new(None),
            updates,
            health,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    /// Receiver of rate updates in emission order.
    pub fn subscribe(&self) -> channel::Receiver<RateUpdate> {
        self.updates.1.clone()
    }

    /// Receiver of degraded/recovered notifications.
    pub fn health(&self) -> channel::Receiver<HealthEvent> {
        self.health.1.clone()
    }

    /// Start the sampling thread. A no-op while already running.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut worker = lock(&self.worker);
        if let Some(existing) = worker.take() {
            if self.state.load(Ordering::Acquire) == RUNNING && !existing.handle.is_finished() {
                *worker = Some(existing);
                return Ok(());
            }
            // Loop ended on its own (panic); reap it before starting again.
            let _ = existing.handle.join();
        }
        self.state.store(RUNNING, Ordering::Release);

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ctx = LoopContext {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            stop_rx,
            updates_tx: self.updates.0.clone(),
            updates_rx: self.updates.1.clone(),
            health_tx: self.health.0.clone(),
            health_rx: self.health.1.clone(),
        };
        let spawned = TimedReader::spawn(Arc::clone(&self.source), self.config.read_timeout).and_then(|mut reader| {
            thread::Builder::new().name("netspeed-sampler".into()).spawn(move || {
                let _idle = IdleOnExit(Arc::clone(&ctx.state));
                run_loop(&ctx, &mut reader);
            })
        });
        match spawned {
            Ok(handle) => {
                info!(
                    min = ?self.config.min_interval,
                    max = ?self.config.max_interval,
                    window = ?self.config.window,
                    "Sampling engine started"
                );
                *worker = Some(Worker { handle, stop_tx });
                Ok(())
            }
            Err(e) => {
                self.state.store(IDLE, Ordering::Release);
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Ask the loop to stop and wait for it. Once this returns nothing more is emitted.
    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        let Some(Worker { handle, stop_tx }) = worker.take() else {
            return;
        };
        // Only Running moves to Stopping; any other state is left as is.
        let _ = self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire);
        drop(stop_tx);
        if handle.join().is_err() {
            warn!("Sampler thread panicked");
        }
        self.state.store(IDLE, Ordering::Release);
        info!("Sampling engine stopped");
    }
}

impl Drop for SamplingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct IdleOnExit(Arc<AtomicU8>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

struct LoopContext {
    config: EngineConfig,
    state: Arc<AtomicU8>,
    stop_rx: channel::Receiver<()>,
    updates_tx: channel::Sender<RateUpdate>,
    updates_rx: channel::Receiver<RateUpdate>,
    health_tx: channel::Sender<HealthEvent>,
    health_rx: channel::Receiver<HealthEvent>,
}

impl LoopContext {
    fn stop_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    /// Interruptible sleep. Returns false when a stop arrived.
    fn sleep(&self, pause: Duration) -> bool {
        matches!(self.stop_rx.recv_timeout(pause), Err(channel::RecvTimeoutError::Timeout))
    }
}

fn run_loop(ctx: &LoopContext, reader: &mut TimedReader) {
    let config = &ctx.config;
    let mut sampler = Sampler::new(config);
    let mut gate = DeliveryGate::new(config.min_delivery_spacing);
    let mut failures: u32 = 0;
    // First read happens immediately to establish the baseline.
    let mut pause = Duration::ZERO;

    while !ctx.stop_requested() {
        let iteration_start = Instant::now();
        if !ctx.sleep(pause) {
            break;
        }

        let snapshot = match reader.read(&ctx.stop_rx) {
            None => break,
            Some(Ok(snapshot)) => snapshot,
            Some(Err(err)) => {
                failures = failures.saturating_add(1);
                warn!(error = %err, failures, "Counter read failed, retrying");
                if failures == config.degraded_after {
                    deliver(
                        &ctx.health_tx,
                        &ctx.health_rx,
                        HealthEvent::Degraded { consecutive_failures: failures, last_error: err.to_string() },
                    );
                }
                pause = config.fallback_interval;
                continue;
            }
        };
        if failures >= config.degraded_after {
            info!(after_failures = failures, "Counter reads recovered");
            deliver(&ctx.health_tx, &ctx.health_rx, HealthEvent::Recovered { after_failures: failures });
        }
        failures = 0;
        pause = sampler.interval();

        let tick = match sampler.observe(snapshot) {
            Observation::Tick(tick) => tick,
            Observation::Baseline | Observation::ClockAnomaly => continue,
        };
        pause = tick.next_interval;
        debug!(
            down_bps = tick.download.smoothed,
            up_bps = tick.upload.smoothed,
            volatility = tick.volatility,
            next = ?tick.next_interval,
            "Sampled"
        );

        if gate.admit(Instant::now()) {
            let update = RateUpdate::from_tick(&tick, config.unit, iteration_start.elapsed());
            deliver(&ctx.updates_tx, &ctx.updates_rx, update);
        }
    }
    debug!("Sampler loop exiting");
}

// Never blocks: a full queue loses its oldest entry so the consumer sees fresh data.
fn deliver<T>(tx: &channel::Sender<T>, rx: &channel::Receiver<T>, mut msg: T) {
    for _ in 0..2 {
        match tx.try_send(msg) {
            Ok(()) => return,
            Err(channel::TrySendError::Full(back)) => {
                debug!("Consumer lagging, dropping oldest queued message");
                let _ = rx.try_recv();
                msg = back;
            }
            Err(channel::TrySendError::Disconnected(_)) => return,
        }
    }
}
