//! Data model shared by every component: beats, patterns, textures and
//! the recording handed to the persistence layer.

pub mod heartrate;
pub mod moment;
pub mod pattern;
pub mod texture;

pub use heartrate::BeatEvent;
pub use moment::SavedMoment;
pub use pattern::{BreathingGuide, HapticEvent, HapticKind, PatternStep, PulsePattern};
pub use texture::PhysicalProperties;
