//! Real-time session synchronization server: wires the session actors,
//! persistence, lifecycle rules and the WebSocket/HTTP front end together.

pub mod config;
pub mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;

use lifecycle::{InMemoryMembership, LifecycleController, SessionDirectory, StaticTokens};
use net::{AppState, ConnectionRegistry};
use persistence::{run_save_writer, FileStore, MemoryStore, SessionStore};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, StoreBackend};
use crate::shutdown::ShutdownRx;

/// Snapshots queued for the save writer before actors start skipping saves.
const SAVE_QUEUE: usize = 1024;

/// A server bound to its listener and accepting connections.
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub controller: Arc<LifecycleController>,
    pub registry: Arc<ConnectionRegistry>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    /// Wait for the server to drain after shutdown. Loaded sessions are
    /// persisted before this returns.
    pub async fn wait(self) -> std::io::Result<()> {
        self.task
            .await
            .map_err(|e| std::io::Error::other(format!("server task failed: {e}")))?
    }
}

fn build_store(config: &ServerConfig) -> Arc<dyn SessionStore> {
    match config.persistence.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => {
            tracing::info!(dir = %config.persistence.dir, "Using file session store");
            Arc::new(FileStore::new(&config.persistence.dir))
        }
    }
}

/// Bind `config.net.addr` and start serving until `shutdown` fires.
pub async fn start(config: &ServerConfig, shutdown: ShutdownRx) -> std::io::Result<RunningServer> {
    let store = build_store(config);

    let (save_tx, save_rx) = mpsc::channel(SAVE_QUEUE);
    tokio::spawn(run_save_writer(save_rx, store.clone()));

    let limits = config.to_connection_limits();
    let registry = Arc::new(ConnectionRegistry::new(limits.outbound_buffer));
    let directory = SessionDirectory::new(
        registry.clone(),
        store.clone(),
        Some(save_tx),
        config.to_actor_config(),
    );

    let auth = StaticTokens::new(config.auth.tokens.clone());
    if auth.is_empty() {
        tracing::warn!("No auth tokens configured; every connection will be refused");
    }

    let controller = Arc::new(LifecycleController::new(
        directory,
        Arc::new(auth),
        Arc::new(InMemoryMembership::new()),
        store,
        registry.clone(),
        config.to_lifecycle_config(),
    ));
    tokio::spawn(controller.clone().run_reaper(shutdown.clone().into_inner()));

    let listener = TcpListener::bind(&config.net.addr).await?;
    let local_addr = listener.local_addr()?;

    let state = AppState {
        controller: controller.clone(),
        registry: registry.clone(),
        limits,
        shutdown: shutdown.into_inner(),
    };
    let drain = controller.clone();
    let task = tokio::spawn(async move {
        let result = net::serve(listener, state).await;
        drain.shutdown().await;
        result
    });

    tracing::info!(%local_addr, "Sync server started");
    Ok(RunningServer {
        local_addr,
        controller,
        registry,
        task,
    })
}
