//! Manual tap input
//!
//! The displayed rate is smoothed over the last few taps while the emitted
//! interval is the latest gap, so tapping still feels immediate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{BeatEmitter, BeatSource, SourceError, SourceKind, SourceState};
use crate::flow::lock;
use crate::types::BeatEvent;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Number of taps kept for smoothing.
    pub window: usize,
    /// A gap longer than this starts a new rhythm.
    pub reset_after_ms: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            window: 10,
            reset_after_ms: 3000,
        }
    }
}

/// Bounded ring of tap instants.
#[derive(Debug, Clone)]
pub struct TapTracker {
    taps: VecDeque<Instant>,
    capacity: usize,
    reset_after: Duration,
}

impl TapTracker {
    pub fn new(config: &TapConfig) -> Self {
        let capacity = config.window.max(2);
        Self {
            taps: VecDeque::with_capacity(capacity),
            capacity,
            reset_after: Duration::from_millis(config.reset_after_ms),
        }
    }

    /// Record a tap. Returns `(bpm, rr_interval_ms)` once two or more taps
    /// are in the ring.
    pub fn register(&mut self, at: Instant) -> Option<(f32, u32)> {
        if let Some(&last) = self.taps.back() {
            if at < last {
                log::debug!("Ignoring out-of-order tap");
                return None;
            }
            if at.duration_since(last) > self.reset_after {
                self.taps.clear();
            }
        }

        self.taps.push_back(at);
        while self.taps.len() > self.capacity {
            self.taps.pop_front();
        }
        if self.taps.len() < 2 {
            return None;
        }

        let deltas: Vec<u32> = self
            .taps
            .iter()
            .zip(self.taps.iter().skip(1))
            .map(|(a, b)| b.duration_since(*a).as_millis() as u32)
            .collect();
        let mean = deltas.iter().map(|&d| d as f64).sum::<f64>() / deltas.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        let latest = *deltas.last()?;
        Some(((60_000.0 / mean) as f32, latest))
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Beat source driven by the user tapping along with their pulse.
pub struct TapInput {
    tracker: Mutex<TapTracker>,
    emitter: BeatEmitter,
    state: AtomicU8,
}

impl TapInput {
    pub fn new(config: TapConfig, emitter: BeatEmitter) -> Self {
        Self {
            tracker: Mutex::new(TapTracker::new(&config)),
            emitter,
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn register_tap(&self) -> Option<BeatEvent> {
        self.register_tap_at(Instant::now())
    }

    /// Record a tap at `at`. Taps while the source is not active are ignored.
    pub fn register_tap_at(&self, at: Instant) -> Option<BeatEvent> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return None;
        }
        let (bpm, rr) = lock(&self.tracker).register(at)?;
        Some(self.emitter.emit(bpm, rr))
    }

    pub fn tap_count(&self) -> usize {
        lock(&self.tracker).len()
    }
}

#[async_trait]
impl BeatSource for TapInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Tap
    }

    async fn start(&self) -> Result<(), SourceError> {
        lock(&self.tracker).reset();
        self.state.store(RUNNING, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        lock(&self.tracker).reset();
        let _ = self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn state(&self) -> SourceState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => SourceState::Running,
            STOPPED => SourceState::Stopped,
            _ => SourceState::Idle,
        }
    }
}
