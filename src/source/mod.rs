//! Beat sources
//!
//! Three interchangeable origins of [`BeatEvent`]s: a wireless heart rate
//! sensor, manual taps, and a synthetic generator. All of them publish into
//! one shared [`DataChannel`] through a [`BeatEmitter`], and a
//! [`BeatSourceManager`] keeps at most one of them live.

pub mod simulator;
pub mod tap;
pub mod wireless;

pub use simulator::{Simulator, SimulatorConfig, SimulatorModel};
pub use tap::{TapConfig, TapInput, TapTracker};
pub use wireless::{DisconnectReason, WirelessSensor};

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ble::BleError;
use crate::flow::{lock, DataChannel};
use crate::types::BeatEvent;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Heart rate sensor unavailable: {0}")]
    Hardware(#[from] BleError),

    #[error("Invalid source configuration: {0}")]
    InvalidConfig(String),

    #[error("No beat source could be started ({} tried)", .0.len())]
    NoSourceAvailable(Vec<(SourceKind, String)>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Wireless,
    Tap,
    Simulated,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Wireless => "wireless sensor",
            SourceKind::Tap => "tap input",
            SourceKind::Simulated => "simulator",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a single source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Running,
    Stopped,
}

/// A producer of beat events.
#[async_trait]
pub trait BeatSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Begin producing beats. Hardware problems are returned, never panicked on.
    async fn start(&self) -> Result<(), SourceError>;

    /// Tear down every timer and subscription owned by the source.
    /// Safe to call repeatedly.
    async fn stop(&self);

    fn state(&self) -> SourceState;

    fn is_active(&self) -> bool {
        self.state() == SourceState::Running
    }
}

/// Publishes beats into the shared channel, keeping timestamps
/// non-decreasing.
#[derive(Clone)]
pub struct BeatEmitter {
    channel: Arc<DataChannel<BeatEvent>>,
    last_timestamp: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl BeatEmitter {
    pub fn new(channel: Arc<DataChannel<BeatEvent>>) -> Self {
        Self {
            channel,
            last_timestamp: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emit(&self, bpm: f32, rr_interval_ms: u32) -> BeatEvent {
        let timestamp = {
            let mut last = lock(&self.last_timestamp);
            let now = Utc::now();
            let stamped = match *last {
                Some(previous) if previous > now => previous,
                _ => now,
            };
            *last = Some(stamped);
            stamped
        };
        let beat = BeatEvent::at(bpm, rr_interval_ms, timestamp);
        self.channel.publish(beat.clone());
        beat
    }

    pub fn channel(&self) -> &Arc<DataChannel<BeatEvent>> {
        &self.channel
    }
}

/// Outcome of [`BeatSourceManager::activate_first_available`].
#[derive(Debug)]
pub struct Activation {
    pub kind: SourceKind,
    /// Sources tried before the one that started, with their errors.
    pub failures: Vec<(SourceKind, String)>,
}

/// Owns the single live beat source.
pub struct BeatSourceManager {
    emitter: BeatEmitter,
    active: tokio::sync::Mutex<Option<Arc<dyn BeatSource>>>,
}

impl BeatSourceManager {
    pub fn new() -> Self {
        let channel = Arc::new(DataChannel::new("beats"));
        Self {
            emitter: BeatEmitter::new(channel),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// The shared channel every source publishes into.
    pub fn beats(&self) -> &Arc<DataChannel<BeatEvent>> {
        self.emitter.channel()
    }

    /// Emitter to hand to sources built for this manager.
    pub fn emitter(&self) -> BeatEmitter {
        self.emitter.clone()
    }

    /// Stop the current source, then start `source`.
    ///
    /// When `source` fails to start no source is live afterwards; choosing
    /// a fallback is up to the caller.
    pub async fn activate(&self, source: Arc<dyn BeatSource>) -> Result<SourceKind, SourceError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stop().await;
            log::info!("Deactivated {}", previous.kind());
        }

        let kind = source.kind();
        source.start().await?;
        log::info!("Activated {}", kind);
        *active = Some(source);
        Ok(kind)
    }

    /// Try each candidate in order until one starts.
    pub async fn activate_first_available(
        &self,
        candidates: Vec<Arc<dyn BeatSource>>,
    ) -> Result<Activation, SourceError> {
        let mut failures = Vec::new();
        for candidate in candidates {
            let kind = candidate.kind();
            match self.activate(candidate).await {
                Ok(kind) => return Ok(Activation { kind, failures }),
                Err(e) => {
                    log::warn!("Could not start {}: {}, falling back", kind, e);
                    failures.push((kind, e.to_string()));
                }
            }
        }
        Err(SourceError::NoSourceAvailable(failures))
    }

    /// Stop the live source, if any.
    pub async fn deactivate(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.stop().await;
            log::info!("Deactivated {}", previous.kind());
        }
    }

    /// Kind of the live source. A source that stopped by itself, such as a
    /// sensor whose link dropped, is released here and reported as `None`.
    pub async fn active_kind(&self) -> Option<SourceKind> {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|s| !s.is_active()) {
            if let Some(gone) = active.take() {
                log::info!("{} stopped on its own", gone.kind());
            }
        }
        active.as_ref().map(|s| s.kind())
    }
}

impl Default for BeatSourceManager {
    fn default() -> Self {
        Self::new()
    }
}
