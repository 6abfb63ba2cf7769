//! Session lifecycle
//!
//! `Idle -> Hosting | Joined -> Ended`. A coordinator owns the
//! [`SessionInfo`] of its session and one relay task that applies incoming
//! messages to it. Ending a session, from either side, aborts the relay and
//! forgets every participant; a new session can be started afterwards.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::transport::{LoopbackTransport, SessionMessage, SessionTransport};
use super::{JoinCode, Participant, SessionConfig, SessionError, SessionInfo, SessionMode};
use crate::flow::{lock, DataChannel};
use crate::types::BeatEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Hosting,
    Joined,
    Ended,
}

impl SessionState {
    fn is_active(self) -> bool {
        matches!(self, SessionState::Hosting | SessionState::Joined)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(Uuid),
    RemoteBeat { participant_id: Uuid, beat: BeatEvent },
    Ended,
}

struct Inner {
    state: SessionState,
    session: Option<SessionInfo>,
    local_id: Option<Uuid>,
}

pub struct SessionCoordinator {
    transport: Arc<dyn SessionTransport>,
    inner: Arc<Mutex<Inner>>,
    events: Arc<DataChannel<SessionEvent>>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                session: None,
                local_id: None,
            })),
            events: Arc::new(DataChannel::new("session-events")),
            relay: Mutex::new(None),
        }
    }

    /// A coordinator whose partner is simulated.
    pub fn with_loopback(config: &SessionConfig) -> Self {
        Self::new(Arc::new(LoopbackTransport::from_config(config)))
    }

    pub fn events(&self) -> &Arc<DataChannel<SessionEvent>> {
        &self.events
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    pub fn session(&self) -> Option<SessionInfo> {
        lock(&self.inner).session.clone()
    }

    pub fn participants(&self) -> Vec<Participant> {
        lock(&self.inner)
            .session
            .as_ref()
            .map(|s| s.participants.clone())
            .unwrap_or_default()
    }

    pub fn local_participant_id(&self) -> Option<Uuid> {
        lock(&self.inner).local_id
    }

    /// True when the partner is reached over a real link rather than
    /// simulated.
    pub fn is_live(&self) -> bool {
        self.transport.is_live()
    }

    fn ensure_can_start(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_active() {
            return Err(SessionError::InvalidState(format!(
                "already in a session ({:?})",
                state
            )));
        }
        Ok(())
    }

    pub async fn create_session(
        &self,
        mode: SessionMode,
        host_name: &str,
    ) -> Result<SessionInfo, SessionError> {
        self.ensure_can_start()?;

        let host = Participant::new(host_name);
        let session = SessionInfo::new(JoinCode::generate(), mode, host.clone());
        self.transport.announce(&session).await?;
        let incoming = match self.transport.incoming().await {
            Ok(incoming) => incoming,
            Err(e) => {
                let _ = self.transport.close().await;
                return Err(e.into());
            }
        };

        self.begin(SessionState::Hosting, session.clone(), host.id, incoming);
        log::info!("Hosting {:?} session {}", mode, session.join_code);
        Ok(session)
    }

    /// Join the session behind a typed code. A malformed code fails
    /// without touching the current state.
    pub async fn join_session(&self, code: &str, name: &str) -> Result<SessionInfo, SessionError> {
        let code = JoinCode::parse(code)?;
        self.ensure_can_start()?;

        let me = Participant::new(name);
        let mut session = self.transport.join(&code, &me).await?;
        session.add_participant(me.clone());
        let incoming = match self.transport.incoming().await {
            Ok(incoming) => incoming,
            Err(e) => {
                let _ = self.transport.close().await;
                return Err(e.into());
            }
        };

        self.begin(SessionState::Joined, session.clone(), me.id, incoming);
        log::info!("Joined session {} hosted by {}", code, session.host.name);
        Ok(session)
    }

    fn begin(
        &self,
        state: SessionState,
        session: SessionInfo,
        local_id: Uuid,
        incoming: mpsc::Receiver<SessionMessage>,
    ) {
        {
            let mut inner = lock(&self.inner);
            inner.state = state;
            inner.session = Some(session);
            inner.local_id = Some(local_id);
        }
        let task = tokio::spawn(relay(
            incoming,
            Arc::clone(&self.inner),
            Arc::clone(&self.events),
            Arc::clone(&self.transport),
        ));
        if let Some(previous) = lock(&self.relay).replace(task) {
            previous.abort();
        }
    }

    /// Record a local beat and relay it to everyone else.
    pub async fn send_beat(&self, bpm: f32, rr_interval_ms: u32) -> Result<BeatEvent, SessionError> {
        let beat = BeatEvent::new(bpm, rr_interval_ms);
        let local_id = {
            let mut inner = lock(&self.inner);
            if !inner.state.is_active() {
                return Err(SessionError::NoSession);
            }
            let local_id = inner.local_id.ok_or(SessionError::NoSession)?;
            if let Some(session) = inner.session.as_mut() {
                session.record_beat(local_id, beat.clone());
            }
            local_id
        };

        self.transport
            .send(SessionMessage::Beat {
                participant_id: local_id,
                beat: beat.clone(),
            })
            .await?;
        Ok(beat)
    }

    /// End the session. Calling it again, or with no session, does nothing.
    pub async fn end_session(&self) {
        let (was, local_id) = {
            let inner = lock(&self.inner);
            (inner.state, inner.local_id)
        };
        if !was.is_active() {
            return;
        }
        if let Some(relay) = lock(&self.relay).take() {
            relay.abort();
        }

        let farewell = match (was, local_id) {
            (SessionState::Hosting, _) => Some(SessionMessage::Ended),
            (_, Some(participant_id)) => Some(SessionMessage::Left { participant_id }),
            _ => None,
        };
        if let Some(message) = farewell {
            if let Err(e) = self.transport.send(message).await {
                log::debug!("Could not say goodbye: {}", e);
            }
        }
        finish(&self.inner, &self.events, self.transport.as_ref()).await;
    }
}

/// Move to `Ended`, drop the session and close the transport. Publishes
/// `Ended` only for the caller that performed the transition.
async fn finish(
    inner: &Mutex<Inner>,
    events: &DataChannel<SessionEvent>,
    transport: &dyn SessionTransport,
) {
    let ended = {
        let mut inner = lock(inner);
        if inner.state.is_active() {
            inner.state = SessionState::Ended;
            inner.session = None;
            inner.local_id = None;
            true
        } else {
            false
        }
    };
    if !ended {
        return;
    }
    if let Err(e) = transport.close().await {
        log::debug!("Transport close reported: {}", e);
    }
    log::info!("Session ended");
    events.publish(SessionEvent::Ended);
}

async fn relay(
    mut incoming: mpsc::Receiver<SessionMessage>,
    inner: Arc<Mutex<Inner>>,
    events: Arc<DataChannel<SessionEvent>>,
    transport: Arc<dyn SessionTransport>,
) {
    while let Some(message) = incoming.recv().await {
        match message {
            SessionMessage::Joined { participant } => {
                let added = {
                    let mut inner = lock(&inner);
                    inner
                        .session
                        .as_mut()
                        .map(|s| s.add_participant(participant.clone()))
                        .unwrap_or(false)
                };
                if added {
                    log::info!("{} joined", participant.name);
                    events.publish(SessionEvent::ParticipantJoined(participant));
                }
            }
            SessionMessage::Beat {
                participant_id,
                beat,
            } => {
                let known = {
                    let mut inner = lock(&inner);
                    inner
                        .session
                        .as_mut()
                        .map(|s| s.record_beat(participant_id, beat.clone()))
                        .unwrap_or(false)
                };
                if known {
                    events.publish(SessionEvent::RemoteBeat {
                        participant_id,
                        beat,
                    });
                } else {
                    log::debug!("Beat from unknown participant {}", participant_id);
                }
            }
            SessionMessage::Left { participant_id } => {
                let (removed, host_left) = {
                    let mut inner = lock(&inner);
                    let joined = inner.state == SessionState::Joined;
                    match inner.session.as_mut() {
                        Some(s) => {
                            let host_left = joined && s.host.id == participant_id;
                            (s.remove_participant(participant_id).is_some(), host_left)
                        }
                        None => (false, false),
                    }
                };
                if removed {
                    events.publish(SessionEvent::ParticipantLeft(participant_id));
                }
                if host_left {
                    break;
                }
            }
            SessionMessage::Ended => break,
        }
    }
    finish(&inner, &events, transport.as_ref()).await;
}
