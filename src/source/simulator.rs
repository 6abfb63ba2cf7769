//! Synthetic heartbeat generator
//!
//! Each tick draws a jittered heart rate around the configured base and
//! schedules the next tick exactly one beat interval later, so the spacing
//! between beats is uneven the way a real pulse is.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{BeatEmitter, BeatSource, SourceError, SourceKind, SourceState};
use crate::flow::lock;
use crate::types::heartrate::{interval_for_bpm, MAX_BPM, MIN_BPM};

/// Share of the jitter bound driven by the slow oscillation; the rest is noise.
const OSCILLATION_SHARE: f64 = 0.6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub base_bpm: f32,
    /// Maximum distance of any emitted bpm from `base_bpm`.
    pub jitter_bpm: f32,
    /// Period of the slow drift, in milliseconds.
    pub oscillation_period_ms: u64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_bpm: 72.0,
            jitter_bpm: 3.0,
            oscillation_period_ms: 20_000,
            seed: None,
        }
    }
}

/// The pure rate model behind [`Simulator`].
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatorModel {
    base_bpm: f64,
    jitter_bpm: f64,
    oscillation_period_ms: f64,
}

impl SimulatorModel {
    pub fn new(config: &SimulatorConfig) -> Result<Self, SourceError> {
        if !config.base_bpm.is_finite() || !(MIN_BPM..=MAX_BPM).contains(&config.base_bpm) {
            return Err(SourceError::InvalidConfig(format!(
                "base bpm {} outside {}..={}",
                config.base_bpm, MIN_BPM, MAX_BPM
            )));
        }
        if !config.jitter_bpm.is_finite() || config.jitter_bpm < 0.0 {
            return Err(SourceError::InvalidConfig(format!(
                "jitter {} must be a non-negative number",
                config.jitter_bpm
            )));
        }
        Ok(Self {
            base_bpm: config.base_bpm as f64,
            jitter_bpm: config.jitter_bpm as f64,
            oscillation_period_ms: config.oscillation_period_ms.max(1) as f64,
        })
    }

    pub fn base_bpm(&self) -> f32 {
        self.base_bpm as f32
    }

    /// Heart rate for a beat `elapsed` after the simulation began.
    ///
    /// Always within `base ± jitter`.
    pub fn next_bpm<R: Rng>(&self, elapsed: Duration, rng: &mut R) -> f32 {
        let phase = elapsed.as_millis() as f64 / self.oscillation_period_ms * TAU;
        let drift = phase.sin() * self.jitter_bpm * OSCILLATION_SHARE;
        let noise = rng.gen_range(-1.0..=1.0) * self.jitter_bpm * (1.0 - OSCILLATION_SHARE);
        let low = self.base_bpm - self.jitter_bpm;
        let high = self.base_bpm + self.jitter_bpm;
        (self.base_bpm + drift + noise).clamp(low, high) as f32
    }
}

/// Self-scheduling synthetic beat source.
pub struct Simulator {
    config: SimulatorConfig,
    emitter: BeatEmitter,
    rng: Arc<Mutex<StdRng>>,
    state: Arc<Mutex<SourceState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig, emitter: BeatEmitter) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            emitter,
            rng: Arc::new(Mutex::new(rng)),
            state: Arc::new(Mutex::new(SourceState::Idle)),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }
}

#[async_trait]
impl BeatSource for Simulator {
    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }

    async fn start(&self) -> Result<(), SourceError> {
        let model = SimulatorModel::new(&self.config)?;
        if let Some(previous) = lock(&self.task).take() {
            previous.abort();
        }

        let emitter = self.emitter.clone();
        let rng = Arc::clone(&self.rng);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            loop {
                let bpm = {
                    let mut rng = lock(&rng);
                    model.next_bpm(started.elapsed(), &mut *rng)
                };
                let interval = interval_for_bpm(bpm);
                emitter.emit(bpm, interval);
                tokio::time::sleep(Duration::from_millis(interval as u64)).await;
            }
        });

        *lock(&self.task) = Some(handle);
        *lock(&self.state) = SourceState::Running;
        log::debug!("Simulator started at {} bpm", self.config.base_bpm);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        let mut state = lock(&self.state);
        if *state == SourceState::Running {
            *state = SourceState::Stopped;
        }
    }

    fn state(&self) -> SourceState {
        *lock(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::DataChannel;
    use crate::types::BeatEvent;

    fn seeded(base_bpm: f32, seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            base_bpm,
            seed: Some(seed),
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn test_intervals_stay_within_jitter_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        for base in (40..=220).step_by(5) {
            let model = SimulatorModel::new(&seeded(base as f32, 0)).unwrap();
            for beat in 0..200u64 {
                let bpm = model.next_bpm(Duration::from_millis(beat * 731), &mut rng);
                let interval = interval_for_bpm(bpm);
                let effective = 60_000.0 / interval as f64;
                // Rounding the interval to whole milliseconds adds a few percent at most.
                assert!(
                    (effective - base as f64).abs() <= 3.0 * 1.05,
                    "base {} produced {} ({} ms)",
                    base,
                    effective,
                    interval
                );
            }
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(SimulatorModel::new(&seeded(10.0, 0)).is_err());
        let negative = SimulatorConfig {
            jitter_bpm: -1.0,
            ..SimulatorConfig::default()
        };
        assert!(SimulatorModel::new(&negative).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_spaced_by_their_own_interval() {
        let channel = Arc::new(DataChannel::<BeatEvent>::new("beats"));
        let beats = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&beats);
        channel.subscribe(Box::new(move |beat: &BeatEvent| {
            sink.lock().unwrap().push((Instant::now(), beat.rr_interval_ms));
        }));

        let sim = Simulator::new(seeded(72.0, 42), BeatEmitter::new(channel));
        sim.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        sim.stop().await;

        let beats = beats.lock().unwrap().clone();
        assert!(beats.len() >= 10, "only {} beats", beats.len());
        for pair in beats.windows(2) {
            let gap = pair[1].0.duration_since(pair[0].0).as_millis() as u32;
            assert_eq!(gap, pair[0].1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_tick() {
        let channel = Arc::new(DataChannel::<BeatEvent>::new("beats"));
        let sim = Simulator::new(seeded(60.0, 1), BeatEmitter::new(Arc::clone(&channel)));
        sim.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        sim.stop().await;
        sim.stop().await;
        assert_eq!(sim.state(), SourceState::Stopped);

        let mut rx = channel.receiver();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
