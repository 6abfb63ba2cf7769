//! Breathing pacer
//!
//! One inhale/hold/exhale cycle, stretched so a full breath takes as long as
//! a coherence-friendly breathing rate for the current heart rate. The pacer
//! ticks on its own task and publishes a [`BreathingState`] per tick; the
//! state is always recomputed from elapsed time, never accumulated.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::flow::{lock, DataChannel};
use crate::types::BreathingGuide;

pub const MIN_BREATHS_PER_MIN: f64 = 4.0;
pub const MAX_BREATHS_PER_MIN: f64 = 8.0;

const REST_SCALE: f64 = 0.3;
const FULL_SCALE: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreathingPhase {
    Inhale,
    Hold,
    Exhale,
    /// Before the first start and after a stop.
    Rest,
}

impl BreathingPhase {
    pub fn label(self) -> &'static str {
        match self {
            BreathingPhase::Inhale => "Breathe in",
            BreathingPhase::Hold => "Hold",
            BreathingPhase::Exhale => "Breathe out",
            BreathingPhase::Rest => "Ready",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreathingState {
    pub phase: BreathingPhase,
    /// Visual scale in [0.3, 1.0].
    pub scale: f64,
    pub label: String,
    /// Position within the current phase, in [0, 1).
    pub progress: f64,
}

impl BreathingState {
    pub fn rest() -> Self {
        Self::new(BreathingPhase::Rest, REST_SCALE, 0.0)
    }

    fn new(phase: BreathingPhase, scale: f64, progress: f64) -> Self {
        Self {
            phase,
            scale,
            label: phase.label().to_string(),
            progress,
        }
    }
}

pub fn ease_in_out_sine(t: f64) -> f64 {
    -((PI * t).cos() - 1.0) / 2.0
}

/// Length of one breath for a heart rate: `60000 / clamp(bpm / 12, 4, 8)`.
pub fn ideal_cycle_ms(bpm: f32) -> u32 {
    let rate = if bpm.is_finite() {
        (bpm as f64 / 12.0).clamp(MIN_BREATHS_PER_MIN, MAX_BREATHS_PER_MIN)
    } else {
        MIN_BREATHS_PER_MIN
    };
    (60_000.0 / rate).round() as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathingCycle {
    pub inhale_ms: u32,
    pub hold_ms: u32,
    pub exhale_ms: u32,
}

impl BreathingCycle {
    /// Scale the three phases by one factor so the breath lasts
    /// [`ideal_cycle_ms`] for `bpm`. All-zero durations fall back to the
    /// default 4:2:6 guide ratio.
    pub fn calibrated(bpm: f32, inhale_ms: u32, hold_ms: u32, exhale_ms: u32) -> Self {
        let all_zero = inhale_ms == 0 && hold_ms == 0 && exhale_ms == 0;
        let (inhale_ms, hold_ms, exhale_ms) = if all_zero {
            let guide = BreathingGuide::default();
            (guide.inhale_ms, guide.hold_ms, guide.exhale_ms)
        } else {
            (inhale_ms, hold_ms, exhale_ms)
        };
        let total = inhale_ms as f64 + hold_ms as f64 + exhale_ms as f64;
        let ideal = ideal_cycle_ms(bpm);
        let factor = ideal as f64 / total;

        let inhale = (inhale_ms as f64 * factor).round() as u32;
        let hold = (hold_ms as f64 * factor).round() as u32;
        // Exhale takes the rounding remainder so the phases sum to the ideal.
        let exhale = ideal.saturating_sub(inhale + hold);
        Self {
            inhale_ms: inhale,
            hold_ms: hold,
            exhale_ms: exhale,
        }
    }

    pub fn total_ms(&self) -> u64 {
        self.inhale_ms as u64 + self.hold_ms as u64 + self.exhale_ms as u64
    }

    pub fn state_at(&self, elapsed_ms: u64) -> BreathingState {
        let total = self.total_ms();
        if total == 0 {
            return BreathingState::rest();
        }
        let pos = elapsed_ms % total;
        let inhale = self.inhale_ms as u64;
        let hold = self.hold_ms as u64;
        let span = FULL_SCALE - REST_SCALE;

        if pos < inhale {
            let progress = pos as f64 / inhale as f64;
            BreathingState::new(
                BreathingPhase::Inhale,
                REST_SCALE + span * ease_in_out_sine(progress),
                progress,
            )
        } else if pos < inhale + hold {
            let progress = (pos - inhale) as f64 / hold as f64;
            BreathingState::new(BreathingPhase::Hold, FULL_SCALE, progress)
        } else {
            let progress = (pos - inhale - hold) as f64 / self.exhale_ms as f64;
            BreathingState::new(
                BreathingPhase::Exhale,
                FULL_SCALE - span * ease_in_out_sine(progress),
                progress,
            )
        }
    }

    pub fn guide(&self) -> BreathingGuide {
        BreathingGuide {
            inhale_ms: self.inhale_ms,
            hold_ms: self.hold_ms,
            exhale_ms: self.exhale_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    pub tick_interval_ms: u64,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
        }
    }
}

pub struct BreathingPacer {
    tick: Duration,
    state: Arc<Mutex<BreathingState>>,
    cycle: Mutex<Option<BreathingCycle>>,
    states: Arc<DataChannel<BreathingState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BreathingPacer {
    pub fn new(config: &PacerConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.tick_interval_ms.max(1)),
            state: Arc::new(Mutex::new(BreathingState::rest())),
            cycle: Mutex::new(None),
            states: Arc::new(DataChannel::new("breathing")),
            task: Mutex::new(None),
        }
    }

    pub fn states(&self) -> &Arc<DataChannel<BreathingState>> {
        &self.states
    }

    pub fn state(&self) -> BreathingState {
        lock(&self.state).clone()
    }

    pub fn cycle(&self) -> Option<BreathingCycle> {
        *lock(&self.cycle)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).is_some()
    }

    /// Start pacing, replacing any running cycle. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, bpm: f32, inhale_ms: u32, hold_ms: u32, exhale_ms: u32) -> BreathingCycle {
        let cycle = BreathingCycle::calibrated(bpm, inhale_ms, hold_ms, exhale_ms);
        if let Some(previous) = lock(&self.task).take() {
            previous.abort();
        }

        let tick = self.tick;
        let state = Arc::clone(&self.state);
        let states = Arc::clone(&self.states);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let current = cycle.state_at(started.elapsed().as_millis() as u64);
                *lock(&state) = current.clone();
                states.publish(current);
            }
        });

        *lock(&self.cycle) = Some(cycle);
        *lock(&self.task) = Some(handle);
        log::debug!(
            "Pacing {}/{}/{} ms breaths for {} bpm",
            cycle.inhale_ms,
            cycle.hold_ms,
            cycle.exhale_ms,
            bpm
        );
        cycle
    }

    /// Stop ticking and snap back to `Rest`.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        *lock(&self.cycle) = None;
        let rest = BreathingState::rest();
        *lock(&self.state) = rest.clone();
        self.states.publish(rest);
    }
}

impl Drop for BreathingPacer {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixty_bpm_keeps_phases() {
        let cycle = BreathingCycle::calibrated(60.0, 4000, 2000, 6000);
        assert_eq!(
            cycle,
            BreathingCycle {
                inhale_ms: 4000,
                hold_ms: 2000,
                exhale_ms: 6000
            }
        );
        assert_eq!(cycle.guide(), BreathingGuide::default());
    }

    #[test]
    fn test_cycle_matches_ideal_for_any_ratio() {
        for bpm in [20.0f32, 48.0, 55.5, 60.0, 72.0, 90.0, 96.0, 150.0] {
            for (i, h, e) in [(4000, 2000, 6000), (1, 1, 1), (5000, 0, 5000), (3, 7, 11), (0, 0, 9)] {
                let cycle = BreathingCycle::calibrated(bpm, i, h, e);
                let ideal = ideal_cycle_ms(bpm) as i64;
                assert!(
                    (cycle.total_ms() as i64 - ideal).abs() <= 1,
                    "{} bpm {:?} -> {:?}",
                    bpm,
                    (i, h, e),
                    cycle
                );
            }
        }
        assert_eq!(ideal_cycle_ms(20.0), 15_000);
        assert_eq!(ideal_cycle_ms(150.0), 7_500);
        assert_eq!(ideal_cycle_ms(f32::NAN), 15_000);
    }

    #[test]
    fn test_zero_durations_use_default_ratio() {
        assert_eq!(
            BreathingCycle::calibrated(60.0, 0, 0, 0),
            BreathingCycle::calibrated(60.0, 4000, 2000, 6000)
        );
    }

    #[test]
    fn test_state_follows_phases() {
        let cycle = BreathingCycle::calibrated(60.0, 4000, 2000, 6000);

        let start = cycle.state_at(0);
        assert_eq!(start.phase, BreathingPhase::Inhale);
        assert_eq!(start.label, "Breathe in");
        assert!((start.scale - 0.3).abs() < 1e-9);

        let mid_inhale = cycle.state_at(2000);
        assert!((mid_inhale.progress - 0.5).abs() < 1e-9);
        assert!((mid_inhale.scale - 0.65).abs() < 1e-9);

        let hold = cycle.state_at(5000);
        assert_eq!(hold.phase, BreathingPhase::Hold);
        assert_eq!(hold.scale, 1.0);

        let exhale = cycle.state_at(9000);
        assert_eq!(exhale.phase, BreathingPhase::Exhale);
        assert!((exhale.scale - 0.65).abs() < 1e-9);

        // Wraps around.
        assert_eq!(cycle.state_at(12_000), start);
        assert_eq!(cycle.state_at(29_000).phase, BreathingPhase::Hold);
    }

    #[test]
    fn test_scale_stays_in_range() {
        let cycle = BreathingCycle::calibrated(72.0, 3, 1, 5);
        for t in (0..cycle.total_ms() * 2).step_by(37) {
            let s = cycle.state_at(t);
            assert!((0.3..=1.0).contains(&s.scale), "{:?} at {}", s, t);
            assert!((0.0..1.0).contains(&s.progress), "{:?} at {}", s, t);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_ticks_until_stopped() {
        let pacer = BreathingPacer::new(&PacerConfig::default());
        assert_eq!(pacer.state(), BreathingState::rest());

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        pacer.states().subscribe(Box::new(move |s: &BreathingState| {
            sink.lock().unwrap().push(s.phase);
        }));

        let cycle = pacer.start(60.0, 4000, 2000, 6000);
        assert_eq!(pacer.cycle(), Some(cycle));
        tokio::time::sleep(Duration::from_millis(5_010)).await;
        assert_eq!(pacer.state().phase, BreathingPhase::Hold);

        pacer.stop();
        assert_eq!(pacer.state(), BreathingState::rest());
        assert!(pacer.cycle().is_none());
        let count = ticks.lock().unwrap().len();
        assert!(count >= 100, "{} ticks", count);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.lock().unwrap().len(), count);
        assert_eq!(ticks.lock().unwrap().last(), Some(&BreathingPhase::Rest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_cycle() {
        let pacer = BreathingPacer::new(&PacerConfig::default());
        pacer.start(60.0, 4000, 2000, 6000);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let faster = pacer.start(96.0, 4000, 2000, 6000);
        assert_eq!(faster.total_ms(), 7_500);
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Fresh cycle starts over at the beginning of an inhale.
        let state = pacer.state();
        assert_eq!(state.phase, BreathingPhase::Inhale);
        assert!(state.progress < 0.01);
        pacer.stop();
    }
}
