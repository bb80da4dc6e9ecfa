//! Actuator controller: the single consumer of the command queue.
//!
//! Debounce rule per actuator id:
//! - a command carrying `sticky` executes and pins the actuator until
//!   `now + sticky`, replacing any earlier pin
//! - a command without `sticky` arriving while the actuator is pinned is
//!   discarded
//! - a command without `sticky` after the pin expired executes and clears it
//!
//! Only this loop touches [`StickyState`], so it needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use pihub_core::events::{MOVE_SERVO_COMMAND, SERVO_POSITION_EVENT};
use pihub_core::{EventSink, HubClock, publish};
use pihub_settings::CommandSettings;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::command::{HubCommand, MoveCommand, ServoPosition};
use crate::errors::ActuatorError;
use crate::queue::CommandReceiver;

/// Commands consumed by the controller (counter).
pub const HUB_COMMANDS_TOTAL: &str = "hub_commands_total";
/// Commands discarded inside a sticky window (counter).
pub const HUB_COMMANDS_DEBOUNCED_TOTAL: &str = "hub_commands_debounced_total";
/// Commands rejected (counter, labels: reason).
pub const HUB_COMMANDS_REJECTED_TOTAL: &str = "hub_commands_rejected_total";

/// Per-actuator debounce deadlines.
#[derive(Debug, Default)]
pub struct StickyState {
    until: HashMap<u32, Instant>,
}

impl StickyState {
    /// Decide whether a command for `actuator` may run at `now`.
    ///
    /// Sticky commands are always admitted. Non-sticky ones return
    /// `Err(deadline)` while a pin is active; an expired pin is evicted.
    pub fn admit(&mut self, actuator: u32, sticky: bool, now: Instant) -> Result<(), Instant> {
        if sticky {
            return Ok(());
        }
        match self.until.get(&actuator) {
            Some(&until) if now < until => Err(until),
            Some(_) => {
                let _ = self.until.remove(&actuator);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Pin `actuator` until `until`, replacing any earlier pin.
    pub fn pin(&mut self, actuator: u32, until: Instant) {
        let _ = self.until.insert(actuator, until);
    }

    /// Current deadline for `actuator`, expired or not.
    pub fn pinned_until(&self, actuator: u32) -> Option<Instant> {
        self.until.get(&actuator).copied()
    }

    /// Number of stored deadlines.
    pub fn len(&self) -> usize {
        self.until.len()
    }

    /// Whether no deadline is stored.
    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}

/// What happened to one command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    /// The actuator moved and the position was echoed.
    Applied {
        /// Actuator id.
        actuator: u32,
        /// Applied position.
        position: f64,
    },
    /// Discarded inside an active sticky window.
    Debounced {
        /// Actuator id.
        actuator: u32,
    },
    /// The actuator refused the move.
    Rejected(ActuatorError),
    /// The payload could not be decoded.
    Invalid(String),
    /// Not an actuator command; republished under its own name.
    Relayed,
    /// Not an actuator command; dropped.
    Ignored,
}

/// Consumes commands and drives the actuator bank.
pub struct ActuatorController {
    actuator: Arc<dyn Actuator>,
    sink: Arc<dyn EventSink>,
    clock: HubClock,
    sticky: StickyState,
    relay_unhandled: bool,
}

impl ActuatorController {
    /// Create a controller publishing echoes into `sink`.
    pub fn new(
        actuator: Arc<dyn Actuator>,
        sink: Arc<dyn EventSink>,
        clock: HubClock,
        settings: &CommandSettings,
    ) -> Self {
        Self {
            actuator,
            sink,
            clock,
            sticky: StickyState::default(),
            relay_unhandled: settings.relay_unhandled,
        }
    }

    /// Debounce state, for inspection.
    pub fn sticky(&self) -> &StickyState {
        &self.sticky
    }

    /// Process one command.
    pub async fn handle(&mut self, command: HubCommand) -> CommandOutcome {
        counter!(HUB_COMMANDS_TOTAL).increment(1);
        if command.event != MOVE_SERVO_COMMAND {
            return self.unhandled(command);
        }

        let mv = match MoveCommand::from_payload(&command.payload) {
            Ok(mv) => mv,
            Err(e) => {
                counter!(HUB_COMMANDS_REJECTED_TOTAL, "reason" => "invalid").increment(1);
                warn!(origin = ?command.origin, error = %e, "dropping malformed move command");
                return CommandOutcome::Invalid(e.to_string());
            }
        };

        let now = self.clock.now();
        if let Err(until) = self.sticky.admit(mv.actuator, mv.sticky.is_some(), now) {
            counter!(HUB_COMMANDS_DEBOUNCED_TOTAL).increment(1);
            let remaining_ms =
                u64::try_from(until.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX);
            debug!(actuator = mv.actuator, remaining_ms, "move debounced by sticky window");
            return CommandOutcome::Debounced {
                actuator: mv.actuator,
            };
        }

        let pin_until = match mv.sticky.map(|window| now.checked_add(window)) {
            None => None,
            Some(Some(until)) => Some(until),
            Some(None) => {
                counter!(HUB_COMMANDS_REJECTED_TOTAL, "reason" => "invalid").increment(1);
                warn!(origin = ?command.origin, actuator = mv.actuator, "sticky window out of range, dropping move");
                return CommandOutcome::Invalid("sticky window out of range".into());
            }
        };

        if let Err(e) = self.actuator.drive(mv.actuator, mv.position).await {
            counter!(HUB_COMMANDS_REJECTED_TOTAL, "reason" => "actuator").increment(1);
            warn!(actuator = mv.actuator, position = mv.position, error = %e, "actuator rejected move");
            return CommandOutcome::Rejected(e);
        }

        if let Some(until) = pin_until {
            self.sticky.pin(mv.actuator, until);
        }
        let _ = publish(
            self.sink.as_ref(),
            SERVO_POSITION_EVENT,
            &ServoPosition {
                n: mv.actuator,
                position: mv.position,
                time: self.clock.seconds(),
            },
        );
        CommandOutcome::Applied {
            actuator: mv.actuator,
            position: mv.position,
        }
    }

    fn unhandled(&self, command: HubCommand) -> CommandOutcome {
        if self.relay_unhandled {
            let _ = publish(self.sink.as_ref(), &command.event, &command.payload);
            CommandOutcome::Relayed
        } else {
            debug!(event = %command.event, origin = ?command.origin, "no handler for command");
            CommandOutcome::Ignored
        }
    }

    /// Run until `cancel` fires or every sender is dropped, then release
    /// the actuators.
    pub async fn run(mut self, mut commands: CommandReceiver, cancel: CancellationToken) {
        info!("actuator controller started");
        loop {
            let command = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = commands.recv() => match next {
                    Some(command) => command,
                    None => break,
                },
            };
            let _ = self.handle(command).await;
        }
        commands.close();
        if let Err(e) = self.actuator.release_all().await {
            warn!(error = %e, "failed to release actuators");
        }
        info!(pinned = self.sticky.len(), "actuator controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{MockActuator, ServoBank};
    use crate::queue::command_queue;
    use assert_matches::assert_matches;
    use pihub_core::RecordingSink;
    use pihub_settings::ActuatorSettings;
    use serde_json::json;
    use std::time::Duration;

    fn move_cmd(n: u32, position: f64, sticky: Option<f64>) -> HubCommand {
        let mut payload = json!({"n": n, "position": position});
        if let Some(s) = sticky {
            payload["sticky"] = json!(s);
        }
        HubCommand::new(MOVE_SERVO_COMMAND, payload)
    }

    fn controller(actuator: Arc<dyn Actuator>, sink: &RecordingSink) -> ActuatorController {
        ActuatorController::new(
            actuator,
            Arc::new(sink.clone()),
            HubClock::start(),
            &CommandSettings::default(),
        )
    }

    fn bank() -> Arc<ServoBank> {
        Arc::new(ServoBank::new(ActuatorSettings::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_window_discards_then_expires() {
        let bank = bank();
        let sink = RecordingSink::listening();
        let mut ctl = controller(bank.clone(), &sink);

        let out = ctl.handle(move_cmd(3, 0.2, Some(2.0))).await;
        assert_matches!(out, CommandOutcome::Applied { actuator: 3, .. });

        tokio::time::advance(Duration::from_millis(500)).await;
        let out = ctl.handle(move_cmd(3, 0.8, None)).await;
        assert_eq!(out, CommandOutcome::Debounced { actuator: 3 });
        assert_eq!(bank.position(3), Some(0.2));

        tokio::time::advance(Duration::from_secs(2)).await;
        let out = ctl.handle(move_cmd(3, 0.9, None)).await;
        assert_matches!(out, CommandOutcome::Applied { actuator: 3, .. });
        assert_eq!(bank.position(3), Some(0.9));
        assert!(ctl.sticky().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_overrides_active_window() {
        let bank = bank();
        let sink = RecordingSink::listening();
        let mut ctl = controller(bank.clone(), &sink);

        let _ = ctl.handle(move_cmd(1, 0.1, Some(5.0))).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let out = ctl.handle(move_cmd(1, 0.6, Some(1.0))).await;
        assert_matches!(out, CommandOutcome::Applied { .. });
        assert_eq!(bank.position(1), Some(0.6));

        // The new, shorter window replaced the old one.
        tokio::time::advance(Duration::from_millis(1500)).await;
        let out = ctl.handle(move_cmd(1, 0.7, None)).await;
        assert_matches!(out, CommandOutcome::Applied { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn windows_are_per_actuator() {
        let bank = bank();
        let sink = RecordingSink::listening();
        let mut ctl = controller(bank.clone(), &sink);

        let _ = ctl.handle(move_cmd(1, 0.1, Some(10.0))).await;
        let out = ctl.handle(move_cmd(2, 0.5, None)).await;
        assert_matches!(out, CommandOutcome::Applied { actuator: 2, .. });
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_boundary_executes() {
        let mut state = StickyState::default();
        let now = Instant::now();
        state.pin(4, now + Duration::from_secs(1));
        assert!(state.admit(4, false, now).is_err());
        assert!(state.admit(4, false, now + Duration::from_secs(1)).is_ok());
        assert_eq!(state.pinned_until(4), None);
    }

    #[tokio::test(start_paused = true)]
    async fn echo_carries_clock_time() {
        let sink = RecordingSink::listening();
        let mut ctl = controller(bank(), &sink);
        tokio::time::advance(Duration::from_secs(3)).await;

        let _ = ctl.handle(move_cmd(2, 0.5, None)).await;
        let echoes = sink.payloads(SERVO_POSITION_EVENT);
        assert_eq!(echoes.len(), 1);
        assert_eq!(echoes[0]["n"], 2);
        assert_eq!(echoes[0]["position"], 0.5);
        assert!((echoes[0]["time"].as_f64().unwrap() - 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn actuator_error_publishes_nothing() {
        let mut mock = MockActuator::new();
        let _ = mock
            .expect_drive()
            .times(1)
            .returning(|id, _| Err(ActuatorError::InvalidActuator { id, count: 4 }));
        let sink = RecordingSink::listening();
        let mut ctl = controller(Arc::new(mock), &sink);

        let out = ctl.handle(move_cmd(9, 0.5, Some(3.0))).await;
        assert_matches!(out, CommandOutcome::Rejected(ActuatorError::InvalidActuator { id: 9, .. }));
        assert!(sink.published().is_empty());
        // A refused move does not pin the actuator.
        assert!(ctl.sticky().is_empty());
    }

    #[tokio::test]
    async fn debounced_command_never_reaches_actuator() {
        let mut mock = MockActuator::new();
        let _ = mock
            .expect_drive()
            .withf(|id, pos| *id == 1 && (*pos - 0.3).abs() < f64::EPSILON)
            .times(1)
            .returning(|_, _| Ok(()));
        let sink = RecordingSink::deaf();
        let mut ctl = controller(Arc::new(mock), &sink);

        let _ = ctl.handle(move_cmd(1, 0.3, Some(60.0))).await;
        let out = ctl.handle(move_cmd(1, 0.4, None)).await;
        assert_eq!(out, CommandOutcome::Debounced { actuator: 1 });
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid() {
        let sink = RecordingSink::listening();
        let mut ctl = controller(bank(), &sink);
        let out = ctl
            .handle(HubCommand::new(MOVE_SERVO_COMMAND, json!({"position": 0.5})))
            .await;
        assert_matches!(out, CommandOutcome::Invalid(_));
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_ignored_by_default() {
        let sink = RecordingSink::listening();
        let mut ctl = controller(bank(), &sink);
        let out = ctl.handle(HubCommand::new("led", json!({"on": true}))).await;
        assert_eq!(out, CommandOutcome::Ignored);
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_relayed_when_enabled() {
        let sink = RecordingSink::listening();
        let mut ctl = ActuatorController::new(
            bank(),
            Arc::new(sink.clone()),
            HubClock::start(),
            &CommandSettings {
                relay_unhandled: true,
                ..CommandSettings::default()
            },
        );
        let out = ctl.handle(HubCommand::new("led", json!({"on": true}))).await;
        assert_eq!(out, CommandOutcome::Relayed);
        assert_eq!(sink.payloads("led"), vec![json!({"on": true})]);
    }

    #[tokio::test]
    async fn run_processes_queue_and_releases_on_cancel() {
        let bank = bank();
        let sink = RecordingSink::listening();
        let ctl = controller(bank.clone(), &sink);
        let (tx, rx) = command_queue(&CommandSettings::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ctl.run(rx, cancel.clone()));

        tx.submit(move_cmd(1, 0.4, None)).await.unwrap();
        tx.submit(move_cmd(2, 0.6, None)).await.unwrap();
        // Wait for both echoes before cancelling.
        for _ in 0..100 {
            if sink.payloads(SERVO_POSITION_EVENT).len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(bank.position(2), Some(0.6));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(bank.position(1), None);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn oversized_sticky_is_rejected_and_loop_keeps_going() {
        let bank = bank();
        let sink = RecordingSink::listening();
        let ctl = controller(bank.clone(), &sink);
        let (tx, rx) = command_queue(&CommandSettings::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ctl.run(rx, cancel.clone()));

        tx.submit(move_cmd(1, 0.5, Some(1.5e19))).await.unwrap();
        tx.submit(move_cmd(2, 0.5, None)).await.unwrap();
        for _ in 0..100 {
            if !sink.payloads(SERVO_POSITION_EVENT).is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let echoes = sink.payloads(SERVO_POSITION_EVENT);
        assert_eq!(echoes.len(), 1);
        assert_eq!(echoes[0]["n"], 2);
        assert_eq!(bank.position(1), None);

        cancel.cancel();
        handle.await.unwrap();
        // Released on exit.
        assert_eq!(bank.position(2), None);
    }

    #[tokio::test]
    async fn oversized_sticky_never_drives() {
        let mut mock = MockActuator::new();
        let _ = mock.expect_drive().times(0);
        let sink = RecordingSink::listening();
        let mut ctl = controller(Arc::new(mock), &sink);
        let out = ctl.handle(move_cmd(1, 0.5, Some(1.5e19))).await;
        assert_matches!(out, CommandOutcome::Invalid(msg) if msg.contains("sticky"));
        assert!(ctl.sticky().is_empty());
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn run_ends_when_senders_dropped() {
        let mut mock = MockActuator::new();
        let _ = mock.expect_release_all().times(1).returning(|| Ok(()));
        let sink = RecordingSink::deaf();
        let ctl = controller(Arc::new(mock), &sink);
        let (tx, rx) = command_queue(&CommandSettings::default());
        drop(tx);
        ctl.run(rx, CancellationToken::new()).await;
    }
}
