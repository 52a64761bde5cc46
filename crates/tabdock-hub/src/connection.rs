use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::{borrow::Cow, net::SocketAddr, sync::Arc};
use tabdock_core::{
    wire::{decode_inbound, Inbound},
    ProtocolError,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    registry::{Client, ConnId, Outbound},
    server::Hub,
};

const OUTBOUND_CAPACITY: usize = 256;

/// What the handler did with one inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Keepalive,
    Forwarded,
    Rejected(ProtocolError),
    /// The panel side hung up; the snapshot had nowhere to go.
    UiClosed,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        warn!(event = "remote_rejected", remote = %addr);
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

impl Hub {
    pub fn handle_frame(&self, conn_id: ConnId, data: &[u8]) -> FrameOutcome {
        if self.config.debug {
            debug!(event = "message_received", conn_id = %conn_id, raw = %String::from_utf8_lossy(data));
        }
        match decode_inbound(data, self.config.max_frame_bytes) {
            Ok(Inbound::Keepalive) => {
                debug!(event = "keepalive", conn_id = %conn_id);
                FrameOutcome::Keepalive
            }
            Ok(Inbound::Snapshot(snapshot)) => {
                let tabs = snapshot.tabs.len();
                let groups = snapshot.groups.len();
                if self.snapshots.send(snapshot).is_err() {
                    warn!(event = "ui_closed", conn_id = %conn_id);
                    return FrameOutcome::UiClosed;
                }
                debug!(
                    event = "snapshot_forwarded",
                    conn_id = %conn_id,
                    tabs = tabs,
                    groups = groups
                );
                FrameOutcome::Forwarded
            }
            Err(err) => {
                warn!(event = "message_invalid", conn_id = %conn_id, size = data.len(), error = %err);
                FrameOutcome::Rejected(err)
            }
        }
    }

    pub(crate) async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
        let conn_id = self.registry.next_conn_id();
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let (msg, last) = match frame {
                    Outbound::Text(text) => (Message::Text(text), false),
                    Outbound::Ping => (Message::Ping(Vec::new()), false),
                    Outbound::Close(reason) => (
                        Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: Cow::Borrowed(reason),
                        })),
                        true,
                    ),
                };
                match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(event = "write_error", conn_id = %conn_id, error = %err);
                        return;
                    }
                    Err(_) => {
                        warn!(event = "write_timeout", conn_id = %conn_id);
                        return;
                    }
                }
                if last {
                    return;
                }
            }
        });

        let client = Arc::new(Client::new(conn_id, remote, tx));
        self.registry.register(client.clone()).await;
        let ping_task = self.start_ping(client.clone());

        let mut shutdown = self.subscribe_shutdown();
        let reason = loop {
            if *shutdown.borrow_and_update() {
                break "shutdown";
            }
            let next = tokio::select! {
                _ = shutdown.changed() => continue,
                next = ws_receiver.next() => next,
            };
            let msg = match next {
                Some(Ok(value)) => value,
                Some(Err(err)) => {
                    warn!(event = "read_error", conn_id = %conn_id, error = %err);
                    break "read_error";
                }
                None => break "disconnect",
            };
            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %conn_id);
                    break "disconnect";
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            self.handle_frame(conn_id, &data);
        };

        if let Some(task) = ping_task {
            task.abort();
        }
        self.registry.unregister(&client, reason).await;
        drop(client);
        let abort = write_task.abort_handle();
        if tokio::time::timeout(write_timeout, write_task).await.is_err() {
            abort.abort();
        }
    }

    fn start_ping(&self, client: Arc<Client>) -> Option<JoinHandle<()>> {
        let interval = self.config.ping_interval;
        if interval.is_zero() {
            return None;
        }
        let registry = self.registry.clone();
        let write_timeout = self.config.write_timeout;
        Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                if !client.ping(write_timeout).await {
                    warn!(event = "ping_failed", conn_id = %client.conn_id);
                    registry.unregister(&client, "ping_failed").await;
                    return;
                }
            }
        }))
    }
}
