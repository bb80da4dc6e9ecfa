//! Actuator collaborator seam and the servo bank behind it.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use pihub_settings::ActuatorSettings;
use tracing::{debug, info};

use crate::errors::ActuatorError;

/// Something that can move numbered actuators.
///
/// The controller holds one of these behind an `Arc`; only the controller
/// loop calls it, so implementations never see concurrent drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Move actuator `id` to `position`.
    async fn drive(&self, id: u32, position: f64) -> Result<(), ActuatorError>;

    /// Stop driving every actuator. Called once when the controller exits.
    async fn release_all(&self) -> Result<(), ActuatorError>;
}

/// Bank of PWM servos addressed `1..=count`.
///
/// Positions are mapped linearly onto the configured pulse-width range.
/// This implementation tracks the commanded pulse per channel; a board
/// driver plugs in behind the same [`Actuator`] trait.
pub struct ServoBank {
    limits: ActuatorSettings,
    pulses: Mutex<HashMap<u32, (f64, u32)>>,
}

impl ServoBank {
    /// Create a bank with the given limits. Every channel starts released.
    pub fn new(limits: ActuatorSettings) -> Self {
        Self {
            limits,
            pulses: Mutex::new(HashMap::new()),
        }
    }

    /// Last applied position of `id`, or `None` while released.
    pub fn position(&self, id: u32) -> Option<f64> {
        self.pulses.lock().get(&id).map(|(position, _)| *position)
    }

    /// Last commanded pulse width of `id` in microseconds.
    pub fn pulse_us(&self, id: u32) -> Option<u32> {
        self.pulses.lock().get(&id).map(|(_, pulse)| *pulse)
    }

    /// Pulse width for `position`. Assumes `position` is within limits.
    pub fn pulse_for(&self, position: f64) -> u32 {
        let l = &self.limits;
        let span = l.max_position - l.min_position;
        let fraction = if span > 0.0 {
            (position - l.min_position) / span
        } else {
            0.0
        };
        let pulse_span = f64::from(l.max_pulse_us.saturating_sub(l.min_pulse_us));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let offset = (fraction * pulse_span).round() as u32;
        l.min_pulse_us + offset
    }

    fn check(&self, id: u32, position: f64) -> Result<(), ActuatorError> {
        if id == 0 || id > self.limits.count {
            return Err(ActuatorError::InvalidActuator {
                id,
                count: self.limits.count,
            });
        }
        if !(self.limits.min_position..=self.limits.max_position).contains(&position) {
            return Err(ActuatorError::PositionOutOfRange {
                position,
                min: self.limits.min_position,
                max: self.limits.max_position,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for ServoBank {
    async fn drive(&self, id: u32, position: f64) -> Result<(), ActuatorError> {
        self.check(id, position)?;
        let pulse = self.pulse_for(position);
        let _ = self.pulses.lock().insert(id, (position, pulse));
        debug!(actuator = id, position, pulse_us = pulse, "servo driven");
        Ok(())
    }

    async fn release_all(&self) -> Result<(), ActuatorError> {
        let released = {
            let mut pulses = self.pulses.lock();
            let n = pulses.len();
            pulses.clear();
            n
        };
        info!(released, "servos released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn bank() -> ServoBank {
        ServoBank::new(ActuatorSettings::default())
    }

    #[tokio::test]
    async fn drive_records_position_and_pulse() {
        let bank = bank();
        bank.drive(2, 0.5).await.unwrap();
        assert_eq!(bank.position(2), Some(0.5));
        assert_eq!(bank.pulse_us(2), Some(1500));
    }

    #[test]
    fn pulse_at_limits() {
        let bank = bank();
        assert_eq!(bank.pulse_for(0.0), 1000);
        assert_eq!(bank.pulse_for(1.0), 2000);
        assert_eq!(bank.pulse_for(0.25), 1250);
    }

    #[tokio::test]
    async fn rejects_unknown_actuator() {
        let bank = bank();
        assert_matches!(
            bank.drive(0, 0.5).await,
            Err(ActuatorError::InvalidActuator { id: 0, count: 4 })
        );
        assert_matches!(
            bank.drive(5, 0.5).await,
            Err(ActuatorError::InvalidActuator { id: 5, .. })
        );
        assert_eq!(bank.position(5), None);
    }

    #[tokio::test]
    async fn rejects_out_of_range_position() {
        let bank = bank();
        assert_matches!(
            bank.drive(1, 1.2).await,
            Err(ActuatorError::PositionOutOfRange { .. })
        );
        assert_matches!(
            bank.drive(1, -0.1).await,
            Err(ActuatorError::PositionOutOfRange { .. })
        );
        assert_eq!(bank.position(1), None);
    }

    #[tokio::test]
    async fn release_all_clears_channels() {
        let bank = bank();
        bank.drive(1, 0.1).await.unwrap();
        bank.drive(4, 0.9).await.unwrap();
        bank.release_all().await.unwrap();
        assert_eq!(bank.position(1), None);
        assert_eq!(bank.position(4), None);
    }

    #[test]
    fn custom_pulse_range() {
        let bank = ServoBank::new(ActuatorSettings {
            min_pulse_us: 500,
            max_pulse_us: 2500,
            ..ActuatorSettings::default()
        });
        assert_eq!(bank.pulse_for(0.5), 1500);
    }
}
