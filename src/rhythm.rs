//! Rolling rhythm statistics and live pulse patterns.

use std::collections::VecDeque;

use crate::types::pattern::clamp_unit;
use crate::types::{BeatEvent, BreathingGuide, PatternStep, PulsePattern};

pub const DEFAULT_WINDOW: usize = 16;

/// Bpm at or below which pattern intensity bottoms out.
const INTENSITY_FLOOR_BPM: f32 = 40.0;
const INTENSITY_SPAN_BPM: f32 = 140.0;

/// The last few beats of a stream.
#[derive(Clone, Debug)]
pub struct RhythmWindow {
    beats: VecDeque<BeatEvent>,
    capacity: usize,
}

impl RhythmWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            beats: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, beat: BeatEvent) {
        self.beats.push_back(beat);
        while self.beats.len() > self.capacity {
            self.beats.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn clear(&mut self) {
        self.beats.clear();
    }

    pub fn latest(&self) -> Option<&BeatEvent> {
        self.beats.back()
    }

    pub fn average_bpm(&self) -> Option<f32> {
        if self.beats.is_empty() {
            return None;
        }
        let sum: f64 = self.beats.iter().map(|b| b.bpm as f64).sum();
        Some((sum / self.beats.len() as f64) as f32)
    }

    pub fn rr_intervals(&self) -> Vec<u32> {
        self.beats.iter().map(|b| b.rr_interval_ms).collect()
    }

    /// RMSSD of the RR intervals in the window. Needs at least two beats.
    ///
    /// A rough indicator for display, nothing diagnostic.
    pub fn variability_ms(&self) -> Option<f32> {
        if self.beats.len() < 2 {
            return None;
        }
        let squares: Vec<f64> = self
            .beats
            .iter()
            .zip(self.beats.iter().skip(1))
            .map(|(a, b)| {
                let diff = b.rr_interval_ms as f64 - a.rr_interval_ms as f64;
                diff * diff
            })
            .collect();
        let mean = squares.iter().sum::<f64>() / squares.len() as f64;
        Some(mean.sqrt() as f32)
    }

    pub fn emotional_state(&self) -> Option<&'static str> {
        self.average_bpm().map(emotional_state_for)
    }

    pub fn rhythm_description(&self) -> Option<String> {
        let bpm = self.average_bpm()?;
        let steadiness = match self.variability_ms() {
            None => "single beat",
            Some(v) if v < 20.0 => "steady",
            Some(v) if v < 60.0 => "gently varying",
            Some(_) => "irregular",
        };
        Some(format!("{} rhythm around {:.0} bpm", steadiness, bpm))
    }

    /// Snapshot the window as a playable pattern, one interval step per beat.
    pub fn to_pulse_pattern(&self, breathing_guide: Option<BreathingGuide>) -> Option<PulsePattern> {
        let bpm = self.average_bpm()?;
        let steps = self
            .beats
            .iter()
            .map(|b| PatternStep::Interval {
                rr_interval_ms: b.rr_interval_ms,
            })
            .collect();
        let intensity = clamp_unit((bpm - INTENSITY_FLOOR_BPM) / INTENSITY_SPAN_BPM);
        let pattern = PulsePattern::new(
            bpm,
            self.rhythm_description()?,
            steps,
            emotional_state_for(bpm),
            intensity,
        );
        Some(match breathing_guide {
            Some(guide) => pattern.with_breathing_guide(guide),
            None => pattern,
        })
    }
}

impl Default for RhythmWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

pub fn emotional_state_for(bpm: f32) -> &'static str {
    if bpm < 60.0 {
        "deeply calm"
    } else if bpm < 75.0 {
        "calm"
    } else if bpm < 90.0 {
        "engaged"
    } else if bpm < 110.0 {
        "excited"
    } else {
        "intense"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(rrs: &[u32]) -> RhythmWindow {
        let mut window = RhythmWindow::default();
        for &rr in rrs {
            window.push(BeatEvent::new(60_000.0 / rr as f32, rr));
        }
        window
    }

    #[test]
    fn test_window_is_bounded() {
        let window = window_of(&[800; 40]);
        assert_eq!(window.len(), DEFAULT_WINDOW);
        assert!((window.average_bpm().unwrap() - 75.0).abs() < 1e-3);
    }

    #[test]
    fn test_rmssd() {
        let window = window_of(&[800, 820, 800, 820]);
        assert!((window.variability_ms().unwrap() - 20.0).abs() < 1e-3);
        assert!(window_of(&[800]).variability_ms().is_none());
    }

    #[test]
    fn test_emotional_bands() {
        assert_eq!(emotional_state_for(55.0), "deeply calm");
        assert_eq!(emotional_state_for(60.0), "calm");
        assert_eq!(emotional_state_for(80.0), "engaged");
        assert_eq!(emotional_state_for(100.0), "excited");
        assert_eq!(emotional_state_for(130.0), "intense");
        assert!(RhythmWindow::default().emotional_state().is_none());
    }

    #[test]
    fn test_live_pattern() {
        let window = window_of(&[1000, 1000, 1000]);
        let pattern = window.to_pulse_pattern(Some(BreathingGuide::default())).unwrap();
        assert_eq!(pattern.bpm, 60.0);
        assert_eq!(pattern.haptic_sequence.len(), 3);
        assert_eq!(pattern.total_duration_ms(), 3000);
        assert!((pattern.intensity - 20.0 / 140.0).abs() < 1e-6);
        assert_eq!(pattern.emotional_state, "calm");
        assert_eq!(pattern.rhythm_description, "steady rhythm around 60 bpm");
        assert!(pattern.breathing_guide.is_some());

        let slow = window_of(&[2000]).to_pulse_pattern(None).unwrap();
        assert_eq!(slow.intensity, 0.0);
    }
}
