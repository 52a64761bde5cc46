//! Command hand-off from the panel thread to the network runtime.
//!
//! `enqueue` is a plain synchronous call that never blocks, so UI callbacks can
//! use it directly. The receiving half lives inside the broadcast worker.

use tabdock_core::wire::Command;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Command>,
}

#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

pub fn command_queue() -> (CommandQueue, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandQueue { tx }, CommandReceiver { rx })
}

impl CommandQueue {
    pub fn enqueue(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!(
                event = "command_dropped",
                reason = "worker_stopped",
                action = command.action()
            );
        }
    }
}

impl CommandReceiver {
    pub fn try_dequeue(&mut self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next command. `None` once every queue handle is gone.
    pub async fn next(&mut self) -> Option<Command> {
        self.rx.recv().await
    }
}
