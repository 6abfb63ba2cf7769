//! SavedMoment: the snapshot of a finished recording handed to the
//! persistence layer. This crate builds it but never stores or reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pattern::PulsePattern;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedMoment {
    pub id: Uuid,
    pub name: String,
    /// Serialized as ISO-8601.
    pub date: DateTime<Utc>,
    pub average_bpm: f32,
    pub emotional_state: String,
    pub duration_seconds: u64,
    pub pattern: PulsePattern,
}

impl SavedMoment {
    pub fn new(
        name: impl Into<String>,
        date: DateTime<Utc>,
        duration_seconds: u64,
        pattern: PulsePattern,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            date,
            average_bpm: pattern.bpm,
            emotional_state: pattern.emotional_state.clone(),
            duration_seconds,
            pattern,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pattern::PatternStep;
    use chrono::TimeZone;

    #[test]
    fn test_date_serializes_as_iso8601() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap();
        let pattern = PulsePattern::new(
            64.0,
            "steady",
            vec![PatternStep::Interval { rr_interval_ms: 937 }],
            "calm",
            0.2,
        );
        let moment = SavedMoment::new("Evening", date, 42, pattern);
        let json: serde_json::Value = serde_json::from_str(&moment.to_json().unwrap()).unwrap();

        assert_eq!(json["date"], "2024-03-09T18:30:00Z");
        assert_eq!(json["average_bpm"], 64.0);
        assert_eq!(json["emotional_state"], "calm");
        assert_eq!(json["duration_seconds"], 42);
    }
}
