//! Bounded command queue between connection sessions and the controller.
//!
//! Producers are many (one [`CommandSender`] clone per session), the consumer
//! is the single [`ActuatorController`](crate::ActuatorController) loop.

use metrics::counter;
use pihub_settings::{CommandSettings, QueueFullPolicy};
use tokio::sync::mpsc;
use tracing::warn;

use crate::command::HubCommand;
use crate::controller::HUB_COMMANDS_REJECTED_TOTAL;
use crate::errors::CommandError;

/// Create a queue sized and behaving per `settings`.
pub fn command_queue(settings: &CommandSettings) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    (
        CommandSender {
            tx,
            policy: settings.full_policy,
        },
        CommandReceiver { rx },
    )
}

/// Producer half. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::Sender<HubCommand>,
    policy: QueueFullPolicy,
}

impl CommandSender {
    /// Enqueue a command.
    ///
    /// Under [`QueueFullPolicy::Block`] this waits for room, which only
    /// back-pressures the calling session. Under
    /// [`QueueFullPolicy::DropNewest`] a full queue rejects the command.
    pub async fn submit(&self, command: HubCommand) -> Result<(), CommandError> {
        match self.policy {
            QueueFullPolicy::Block => self
                .tx
                .send(command)
                .await
                .map_err(|_| CommandError::QueueClosed),
            QueueFullPolicy::DropNewest => match self.tx.try_send(command) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    counter!(HUB_COMMANDS_REJECTED_TOTAL, "reason" => "queue_full").increment(1);
                    warn!(event = %dropped.event, "command queue full, dropping command");
                    Err(CommandError::QueueFull)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(CommandError::QueueClosed),
            },
        }
    }

    /// The configured full-queue policy.
    pub fn policy(&self) -> QueueFullPolicy {
        self.policy
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<HubCommand>,
}

impl CommandReceiver {
    /// Next command, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<HubCommand> {
        self.rx.recv().await
    }

    /// Stop accepting new commands; already queued ones can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;

    fn settings(capacity: usize, policy: QueueFullPolicy) -> CommandSettings {
        CommandSettings {
            queue_capacity: capacity,
            full_policy: policy,
            relay_unhandled: false,
        }
    }

    fn cmd(i: u64) -> HubCommand {
        HubCommand::new("move-servo", json!({"n": 1, "position": 0.1, "seq": i}))
    }

    #[tokio::test]
    async fn fifo_order() {
        let (tx, mut rx) = command_queue(&settings(8, QueueFullPolicy::Block));
        for i in 0..3 {
            tx.submit(cmd(i)).await.unwrap();
        }
        for i in 0..3 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn drop_newest_rejects_when_full() {
        let (tx, mut rx) = command_queue(&settings(1, QueueFullPolicy::DropNewest));
        tx.submit(cmd(0)).await.unwrap();
        assert_matches!(tx.submit(cmd(1)).await, Err(CommandError::QueueFull));
        // The older command survives.
        assert_eq!(rx.recv().await.unwrap().payload["seq"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn block_waits_for_room() {
        let (tx, mut rx) = command_queue(&settings(1, QueueFullPolicy::Block));
        tx.submit(cmd(0)).await.unwrap();

        let blocked = tokio::spawn({
            let tx = tx.clone();
            async move { tx.submit(cmd(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap().payload["seq"], 0);
        blocked.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().payload["seq"], 1);
    }

    #[tokio::test]
    async fn submit_after_consumer_gone() {
        let (tx, rx) = command_queue(&settings(4, QueueFullPolicy::Block));
        drop(rx);
        assert!(tx.is_closed());
        assert_matches!(tx.submit(cmd(0)).await, Err(CommandError::QueueClosed));
    }

    #[tokio::test]
    async fn recv_ends_when_senders_dropped() {
        let (tx, mut rx) = command_queue(&settings(4, QueueFullPolicy::Block));
        tx.submit(cmd(0)).await.unwrap();
        drop(tx);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
