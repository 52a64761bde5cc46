use std::{sync::Arc, time::Duration};
use tabdock_core::wire::{encode_command, Command};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{queue::CommandReceiver, registry::ClientRegistry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Single consumer of the command queue. Each command goes to every client
/// registered at the moment it is sent; a failing client is dropped from the
/// registry without affecting the others. Nothing is retried or buffered.
pub struct BroadcastWorker {
    commands: CommandReceiver,
    registry: Arc<ClientRegistry>,
    write_timeout: Duration,
}

impl BroadcastWorker {
    pub fn new(
        commands: CommandReceiver,
        registry: Arc<ClientRegistry>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            commands,
            registry,
            write_timeout,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(event = "broadcast_worker_start");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.commands.next() => next,
            };
            let Some(command) = next else {
                break;
            };
            self.deliver(command).await;
            while let Some(command) = self.commands.try_dequeue() {
                self.deliver(command).await;
            }
        }
        info!(event = "broadcast_worker_stop");
    }

    pub async fn deliver(&self, command: Command) -> Delivery {
        let mut delivery = Delivery::default();
        let text = match encode_command(&command) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "encode_error", action = command.action(), error = %err);
                return delivery;
            }
        };

        let clients = self.registry.snapshot().await;
        if clients.is_empty() {
            debug!(event = "no_clients", action = command.action());
            return delivery;
        }

        for client in clients {
            if client.send_text(&text, self.write_timeout).await {
                delivery.delivered += 1;
            } else {
                warn!(event = "send_error", conn_id = %client.conn_id, action = command.action());
                self.registry.unregister(&client, "send_error").await;
                delivery.failed += 1;
            }
        }
        info!(
            event = "command_broadcast",
            action = command.action(),
            delivered = delivery.delivered,
            failed = delivery.failed
        );
        delivery
    }
}
