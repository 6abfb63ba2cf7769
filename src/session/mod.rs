//! Paired heartbeat sessions
//!
//! A host creates a session and shares its join code; a partner joins with
//! that code and both sides relay their beats to each other. How the two
//! devices talk is a [`transport::SessionTransport`]: a real BLE link or a
//! loopback with a simulated partner.

pub mod coordinator;
pub mod join_code;
pub mod transport;

pub use coordinator::{SessionCoordinator, SessionEvent, SessionState};
pub use join_code::{JoinCode, JoinCodeError};
pub use transport::{
    BleSessionTransport, LoopbackTransport, SessionMessage, SessionTransport, TransportError,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::source::SimulatorConfig;
use crate::types::BeatEvent;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid join code: {0}")]
    InvalidJoinCode(#[from] JoinCodeError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No active session")]
    NoSession,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Two people feel each other's heartbeat.
    Sync,
    /// One heartbeat shared with everyone who joins.
    Broadcast,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub last_beat: Option<BeatEvent>,
}

impl Participant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            joined_at: Utc::now(),
            last_beat: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub join_code: JoinCode,
    pub mode: SessionMode,
    pub host: Participant,
    /// Everyone in the session, host first. Ids are unique.
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(join_code: JoinCode, mode: SessionMode, host: Participant) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            join_code,
            mode,
            participants: vec![host.clone()],
            host,
            created_at: Utc::now(),
        }
    }

    pub fn participant(&self, id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Add a participant unless one with the same id is already present.
    /// Returns whether it was added.
    pub fn add_participant(&mut self, participant: Participant) -> bool {
        if self.participant(participant.id).is_some() {
            return false;
        }
        self.participants.push(participant);
        true
    }

    pub fn remove_participant(&mut self, id: Uuid) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(index))
    }

    /// Record the latest beat of a participant. Returns false for unknown ids.
    pub fn record_beat(&mut self, id: Uuid, beat: BeatEvent) -> bool {
        let mut found = false;
        if self.host.id == id {
            self.host.last_beat = Some(beat.clone());
        }
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == id) {
            p.last_beat = Some(beat);
            found = true;
        }
        found
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name shown for the simulated partner of a loopback session.
    pub loopback_peer_name: String,
    /// Heart rate model of the simulated partner.
    pub loopback_heart: SimulatorConfig,
    /// How long a joiner scans for the host's advertisement.
    pub join_timeout_ms: u64,
    /// How often a host re-advertises its join code.
    pub advertise_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loopback_peer_name: "Partner".to_string(),
            loopback_heart: SimulatorConfig::default(),
            join_timeout_ms: 10_000,
            advertise_interval_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participants_are_unique() {
        let host = Participant::new("Ada");
        let mut session = SessionInfo::new(JoinCode::generate(), SessionMode::Sync, host.clone());
        assert!(!session.add_participant(host.clone()));

        let guest = Participant::new("Grace");
        assert!(session.add_participant(guest.clone()));
        assert_eq!(session.participants.len(), 2);

        assert!(session.record_beat(guest.id, BeatEvent::new(70.0, 857)));
        assert!(!session.record_beat(Uuid::new_v4(), BeatEvent::new(70.0, 857)));
        assert_eq!(session.participant(guest.id).unwrap().last_beat.as_ref().unwrap().rr_interval_ms, 857);

        assert!(session.remove_participant(guest.id).is_some());
        assert!(session.remove_participant(guest.id).is_none());
    }
}
