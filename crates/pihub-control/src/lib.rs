//! # pihub-control
//!
//! Inbound command handling, decoupled from the hub's connection sessions.
//!
//! - [`queue`]: bounded command queue with an explicit full-queue policy
//! - [`actuator`]: the [`Actuator`] collaborator seam and the [`ServoBank`]
//!   implementation with position/modulation limits
//! - [`controller`]: the consumer loop applying the per-actuator sticky
//!   debounce window and echoing applied positions back through the hub

#![deny(unsafe_code)]

pub mod actuator;
pub mod command;
pub mod controller;
pub mod errors;
pub mod queue;

pub use actuator::{Actuator, ServoBank};
pub use command::{HubCommand, MAX_STICKY, MoveCommand, ServoPosition};
pub use controller::{ActuatorController, CommandOutcome, StickyState};
pub use errors::{ActuatorError, CommandError};
pub use queue::{CommandReceiver, CommandSender, command_queue};
