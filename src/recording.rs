//! Recording beats into a [`SavedMoment`].
//!
//! The recorder only builds the snapshot; persisting it is the host's job.

use chrono::{DateTime, Utc};

use crate::rhythm::{emotional_state_for, RhythmWindow};
use crate::types::{BeatEvent, PatternStep, PulsePattern, SavedMoment};

#[derive(Clone, Debug, PartialEq)]
enum RecorderState {
    Idle,
    Recording { started_at: DateTime<Utc> },
}

/// Collects every beat between `start` and `finish`.
#[derive(Debug)]
pub struct Recorder {
    state: RecorderState,
    beats: Vec<BeatEvent>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            beats: Vec::new(),
        }
    }

    /// Begin a new recording, discarding anything unfinished.
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.beats.clear();
        self.state = RecorderState::Recording { started_at: at };
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Beats arriving while idle are ignored.
    pub fn record(&mut self, beat: &BeatEvent) {
        if self.is_recording() {
            self.beats.push(beat.clone());
        }
    }

    pub fn beat_count(&self) -> usize {
        self.beats.len()
    }

    /// Stop recording and build the moment. `None` if nothing was recorded.
    pub fn finish(&mut self, name: &str, at: DateTime<Utc>) -> Option<SavedMoment> {
        let started_at = match std::mem::replace(&mut self.state, RecorderState::Idle) {
            RecorderState::Recording { started_at } => started_at,
            RecorderState::Idle => return None,
        };
        let beats = std::mem::take(&mut self.beats);
        if beats.is_empty() {
            log::debug!("Recording {:?} finished without beats", name);
            return None;
        }

        let average = beats.iter().map(|b| b.bpm as f64).sum::<f64>() / beats.len() as f64;
        let average = average as f32;

        // Describe the tail of the recording the way the live view does.
        let mut window = RhythmWindow::default();
        for beat in &beats {
            window.push(beat.clone());
        }
        let description = window
            .rhythm_description()
            .unwrap_or_else(|| format!("rhythm around {:.0} bpm", average));
        let intensity = window
            .to_pulse_pattern(None)
            .map(|p| p.intensity)
            .unwrap_or_default();

        let steps = beats
            .iter()
            .map(|b| PatternStep::Interval {
                rr_interval_ms: b.rr_interval_ms,
            })
            .collect();
        let pattern = PulsePattern::new(
            average,
            description,
            steps,
            emotional_state_for(average),
            intensity,
        );

        let duration_seconds = (at - started_at).num_seconds().max(0) as u64;
        log::info!(
            "Recorded {:?}: {} beats over {}s",
            name,
            beats.len(),
            duration_seconds
        );
        Some(SavedMoment::new(name, at, duration_seconds, pattern))
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_finish_builds_moment() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        let mut recorder = Recorder::new();
        recorder.record(&BeatEvent::new(200.0, 300));
        recorder.start(start);
        for bpm in [60.0, 62.0, 64.0] {
            recorder.record(&BeatEvent::new(bpm, (60_000.0 / bpm) as u32));
        }
        assert_eq!(recorder.beat_count(), 3);

        let moment = recorder
            .finish("Morning", start + Duration::seconds(95))
            .unwrap();
        assert_eq!(moment.name, "Morning");
        assert_eq!(moment.duration_seconds, 95);
        assert!((moment.average_bpm - 62.0).abs() < 1e-4);
        assert_eq!(moment.emotional_state, "calm");
        assert_eq!(moment.pattern.haptic_sequence.len(), 3);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_empty_recording_yields_nothing() {
        let now = Utc::now();
        let mut recorder = Recorder::new();
        assert!(recorder.finish("never started", now).is_none());
        recorder.start(now);
        assert!(recorder.finish("silent", now).is_none());
    }
}
