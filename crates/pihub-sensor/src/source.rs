//! Sensor source collaborator seam.

use std::pin::Pin;

use futures::Stream;
use pihub_core::SensorEvent;

/// Boxed stream of sensor events.
pub type SensorStream = Pin<Box<dyn Stream<Item = SensorEvent> + Send>>;

/// A hardware (or simulated) sensor.
///
/// The stream is consumed once; a source cannot be restarted after its
/// stream is dropped. Read failures are yielded as
/// [`SensorEvent::Exception`] and do not end the stream.
pub trait SensorSource: Send {
    /// Name used as the channel prefix, e.g. `gyro-0`.
    fn name(&self) -> &str;

    /// Turn the source into its event stream.
    fn into_events(self: Box<Self>) -> SensorStream;
}
