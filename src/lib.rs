// PulseSync - heartbeat-to-haptics pipeline

pub mod flow;
pub mod types;
pub mod ble;
pub mod source;
pub mod rhythm;
pub mod recording;
pub mod haptics;
pub mod session;
pub mod pacer;
pub mod config;

pub use config::{ConfigError, PulseConfig};
pub use flow::DataChannel;
pub use haptics::{HapticError, HapticRenderer};
pub use pacer::{BreathingCycle, BreathingPacer, BreathingPhase, BreathingState};
pub use rhythm::RhythmWindow;
pub use recording::Recorder;
pub use session::{SessionCoordinator, SessionError, SessionEvent, SessionInfo, SessionMode};
pub use source::{BeatSource, BeatSourceManager, SourceError, SourceKind};
pub use types::{BeatEvent, HapticEvent, PhysicalProperties, PulsePattern, SavedMoment};
