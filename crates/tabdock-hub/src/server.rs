use axum::{routing::get, Router};
use crossbeam_channel::Sender;
use std::{
    io,
    net::{AddrParseError, SocketAddr},
    sync::{Arc, Weak},
    thread,
};
use tabdock_core::Snapshot;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use crate::{
    broadcast::BroadcastWorker, config::Config, connection::ws_handler, queue::CommandReceiver,
    registry::ClientRegistry,
};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid listen address {addr}: {source}")]
    InvalidAddr {
        addr: String,
        #[source]
        source: AddrParseError,
    },
    #[error("listen address {0} is not loopback")]
    NonLoopback(SocketAddr),
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("network runtime failed to start: {0}")]
    Runtime(#[source] io::Error),
    #[error("server failed: {0}")]
    Serve(#[source] io::Error),
    #[error("network thread panicked")]
    ThreadPanicked,
}

/// Network-side state shared by every connection task.
pub struct Hub {
    pub(crate) config: Config,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) snapshots: Sender<Snapshot>,
    shutdown: watch::Sender<bool>,
}

impl Hub {
    pub fn new(config: Config, snapshots: Sender<Snapshot>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            snapshots,
            shutdown,
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

pub fn parse_loopback(addr: &str) -> Result<SocketAddr, HubError> {
    let parsed: SocketAddr = addr.parse().map_err(|source| HubError::InvalidAddr {
        addr: addr.to_string(),
        source,
    })?;
    if !parsed.ip().is_loopback() {
        return Err(HubError::NonLoopback(parsed));
    }
    Ok(parsed)
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

/// Runs the listener and the broadcast worker until the hub is shut down.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<Hub>,
    commands: CommandReceiver,
) -> Result<(), HubError> {
    let local_addr = listener.local_addr().map_err(HubError::Serve)?;
    let worker = BroadcastWorker::new(commands, hub.registry.clone(), hub.config.write_timeout)
        .spawn(hub.subscribe_shutdown());

    info!(event = "hub_start", addr = %local_addr);
    let mut shutdown = hub.subscribe_shutdown();
    let result = axum::serve(
        listener,
        router(hub.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await;

    hub.shutdown();
    if worker.await.is_err() {
        warn!(event = "broadcast_worker_panicked");
    }
    info!(event = "hub_stop", addr = %local_addr);
    result.map_err(HubError::Serve)
}

/// The network domain on its own OS thread with a current-thread runtime.
/// The listener is bound before the thread starts so bind errors surface to
/// the caller.
pub struct NetworkThread {
    local_addr: SocketAddr,
    hub: Weak<Hub>,
    handle: thread::JoinHandle<Result<(), HubError>>,
}

impl NetworkThread {
    pub fn spawn(
        config: Config,
        commands: CommandReceiver,
        snapshots: Sender<Snapshot>,
    ) -> Result<Self, HubError> {
        let addr = parse_loopback(&config.addr)?;
        let listener =
            std::net::TcpListener::bind(addr).map_err(|source| HubError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| HubError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| HubError::Bind { addr, source })?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HubError::Runtime)?;

        let hub = Hub::new(config, snapshots);
        let weak = Arc::downgrade(&hub);
        let handle = thread::Builder::new()
            .name("tabdock-net".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener).map_err(|source| {
                        HubError::Bind {
                            addr: local_addr,
                            source,
                        }
                    })?;
                    let signal_hub = hub.clone();
                    let ctrl_c = tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            info!(event = "ctrl_c");
                            signal_hub.shutdown();
                        }
                    });
                    let result = serve(listener, hub, commands).await;
                    ctrl_c.abort();
                    result
                })
            })
            .map_err(HubError::Runtime)?;

        Ok(Self {
            local_addr,
            hub: weak,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals shutdown if the hub is still running and waits for the thread.
    pub fn stop(self) -> Result<(), HubError> {
        if let Some(hub) = self.hub.upgrade() {
            hub.shutdown();
        }
        self.handle.join().map_err(|_| HubError::ThreadPanicked)?
    }
}
