//! types/heartrate.rs
//!
//! Defines the BeatEvent struct, the unit of data every beat source emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest and highest heart rates treated as physiologically plausible.
pub const MIN_BPM: f32 = 30.0;
pub const MAX_BPM: f32 = 240.0;

/// A single detected (or synthesized) heartbeat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Beats per minute at the time of this beat.
    pub bpm: f32,
    /// Time since the previous beat.
    pub rr_interval_ms: u32,
    pub timestamp: DateTime<Utc>,
}

impl BeatEvent {
    pub fn new(bpm: f32, rr_interval_ms: u32) -> Self {
        Self::at(bpm, rr_interval_ms, Utc::now())
    }

    pub fn at(bpm: f32, rr_interval_ms: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            bpm,
            rr_interval_ms,
            timestamp,
        }
    }

    /// Whether the bpm is inside the plausible range.
    pub fn is_plausible(&self) -> bool {
        self.bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&self.bpm)
    }
}

/// Interval in milliseconds for a given heart rate. Returns 0 for
/// non-positive rates.
pub fn interval_for_bpm(bpm: f32) -> u32 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return 0;
    }
    (60_000.0 / bpm).round() as u32
}

/// Heart rate for a given interval. Returns 0 for a zero interval.
pub fn bpm_for_interval(rr_interval_ms: u32) -> f32 {
    if rr_interval_ms == 0 {
        return 0.0;
    }
    60_000.0 / rr_interval_ms as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_conversions() {
        assert_eq!(interval_for_bpm(60.0), 1000);
        assert_eq!(interval_for_bpm(75.0), 800);
        assert_eq!(interval_for_bpm(0.0), 0);
        assert_eq!(bpm_for_interval(800), 75.0);
        assert_eq!(bpm_for_interval(0), 0.0);
    }

    #[test]
    fn test_plausibility() {
        assert!(BeatEvent::new(72.0, 833).is_plausible());
        assert!(!BeatEvent::new(12.0, 5000).is_plausible());
        assert!(!BeatEvent::new(f32::NAN, 0).is_plausible());
    }
}
