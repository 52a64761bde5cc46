use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close(&'static str),
}

#[derive(Debug)]
pub struct Client {
    pub conn_id: ConnId,
    pub remote: SocketAddr,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Outbound>,
}

impl Client {
    pub fn new(conn_id: ConnId, remote: SocketAddr, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            conn_id,
            remote,
            connected_at: Utc::now(),
            sender,
        }
    }

    pub async fn send_text(&self, text: &str, timeout: Duration) -> bool {
        self.sender
            .send_timeout(Outbound::Text(text.to_string()), timeout)
            .await
            .is_ok()
    }

    pub async fn ping(&self, timeout: Duration) -> bool {
        self.sender
            .send_timeout(Outbound::Ping, timeout)
            .await
            .is_ok()
    }

    fn close(&self, reason: &'static str) {
        let _ = self.sender.try_send(Outbound::Close(reason));
    }
}

/// Connected agents keyed by connection id. Readers always get a copy, so a
/// broadcast in progress never observes a connect or disconnect.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    conn_counter: AtomicU64,
    clients: RwLock<BTreeMap<ConnId, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub async fn register(&self, client: Arc<Client>) {
        let total = {
            let mut clients = self.clients.write().await;
            clients.insert(client.conn_id, client.clone());
            clients.len()
        };
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            remote = %client.remote,
            total = total
        );
    }

    /// Removes the client and asks its writer to close the socket. Returns
    /// false when the client was already gone.
    pub async fn unregister(&self, client: &Client, reason: &'static str) -> bool {
        let (removed, total) = {
            let mut clients = self.clients.write().await;
            let removed = clients.remove(&client.conn_id).is_some();
            (removed, clients.len())
        };
        if !removed {
            return false;
        }
        client.close(reason);
        let connected_secs = (Utc::now() - client.connected_at).num_seconds();
        info!(
            event = "client_disconnected",
            conn_id = %client.conn_id,
            remote = %client.remote,
            reason = reason,
            connected_secs = connected_secs,
            total = total
        );
        true
    }

    pub async fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_client(
        registry: &ClientRegistry,
        capacity: usize,
    ) -> (Arc<Client>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let remote: SocketAddr = "127.0.0.1:40000".parse().expect("addr");
        (Arc::new(Client::new(registry.next_conn_id(), remote, tx)), rx)
    }

    #[test]
    fn conn_ids_are_sequential() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.next_conn_id().to_string(), "conn-1");
        assert_eq!(registry.next_conn_id().to_string(), "conn-2");
    }

    #[tokio::test]
    async fn snapshot_is_a_point_in_time_copy() {
        let registry = ClientRegistry::new();
        let (first, _first_rx) = test_client(&registry, 4);
        let (second, _second_rx) = test_client(&registry, 4);
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        let snapshot = registry.snapshot().await;
        assert!(registry.unregister(&first, "disconnect").await);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].conn_id, first.conn_id);
        assert_eq!(snapshot[1].conn_id, second.conn_id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_sends_close_once() {
        let registry = ClientRegistry::new();
        let (client, mut rx) = test_client(&registry, 4);
        registry.register(client.clone()).await;

        assert!(registry.unregister(&client, "send_error").await);
        assert!(!registry.unregister(&client, "send_error").await);
        assert!(registry.is_empty().await);

        assert_eq!(rx.recv().await, Some(Outbound::Close("send_error")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_fails_once_writer_is_gone() {
        let registry = ClientRegistry::new();
        let (client, rx) = test_client(&registry, 4);
        assert!(client.send_text("{}", Duration::from_millis(50)).await);
        drop(rx);
        assert!(!client.send_text("{}", Duration::from_millis(50)).await);
        assert!(!client.ping(Duration::from_millis(50)).await);
    }
}
