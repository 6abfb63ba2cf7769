//! Actuator seams.
//!
//! The host supplies implementations for its vibration hardware. Both
//! traits are fire-and-forget: `vibrate` starts the motor for the given
//! time and returns, the renderer does the waiting.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::actuation::DualMotorEffect;
use super::HapticError;
use crate::flow::lock;

/// A binary on/off vibration motor.
#[async_trait]
pub trait VibrationActuator: Send + Sync {
    async fn vibrate(&self, duration_ms: u32) -> Result<(), HapticError>;

    /// Stop the motor now.
    async fn cancel(&self) -> Result<(), HapticError>;
}

/// A strong/weak rumble pair that schedules effects itself.
#[async_trait]
pub trait DualMotorActuator: Send + Sync {
    async fn play_effects(&self, effects: &[DualMotorEffect]) -> Result<(), HapticError>;

    async fn cancel(&self) -> Result<(), HapticError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActuatorCommand {
    Vibrate(u32),
    Effects(Vec<DualMotorEffect>),
    Cancel,
}

/// Keeps every command it receives, stamped with the tokio clock.
///
/// Stands in for hardware in tests and headless hosts.
#[derive(Default)]
pub struct RecordingActuator {
    log: Mutex<Vec<(Instant, ActuatorCommand)>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<(Instant, ActuatorCommand)> {
        lock(&self.log).clone()
    }

    /// Durations of every `Vibrate` command, in order.
    pub fn vibrations(&self) -> Vec<u32> {
        lock(&self.log)
            .iter()
            .filter_map(|(_, cmd)| match cmd {
                ActuatorCommand::Vibrate(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }

    pub fn cancel_count(&self) -> usize {
        lock(&self.log)
            .iter()
            .filter(|(_, cmd)| *cmd == ActuatorCommand::Cancel)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.log).clear();
    }

    fn push(&self, command: ActuatorCommand) {
        lock(&self.log).push((Instant::now(), command));
    }
}

#[async_trait]
impl VibrationActuator for RecordingActuator {
    async fn vibrate(&self, duration_ms: u32) -> Result<(), HapticError> {
        self.push(ActuatorCommand::Vibrate(duration_ms));
        Ok(())
    }

    async fn cancel(&self) -> Result<(), HapticError> {
        self.push(ActuatorCommand::Cancel);
        Ok(())
    }
}

#[async_trait]
impl DualMotorActuator for RecordingActuator {
    async fn play_effects(&self, effects: &[DualMotorEffect]) -> Result<(), HapticError> {
        self.push(ActuatorCommand::Effects(effects.to_vec()));
        Ok(())
    }

    async fn cancel(&self) -> Result<(), HapticError> {
        self.push(ActuatorCommand::Cancel);
        Ok(())
    }
}
