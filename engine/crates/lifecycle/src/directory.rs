use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use persistence::SessionStore;
use session::{
    spawn_session_actor, ActorConfig, EventSink, SaveJob, SaveTx, Session, SessionHandle, SessionId,
};
use tokio::sync::{oneshot, Mutex};

use crate::error::LifecycleError;

struct Entry {
    handle: SessionHandle,
    /// When the session was first seen with no live connections.
    idle_since: Option<Instant>,
}

/// Loaded sessions, keyed by id. At most one live actor per session.
pub struct SessionDirectory {
    entries: DashMap<SessionId, Entry>,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn SessionStore>,
    save_tx: Option<SaveTx>,
    config: ActorConfig,
    load_lock: Mutex<()>,
}

impl SessionDirectory {
    pub fn new(
        sink: Arc<dyn EventSink>,
        store: Arc<dyn SessionStore>,
        save_tx: Option<SaveTx>,
        config: ActorConfig,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            sink,
            store,
            save_tx,
            config,
            load_lock: Mutex::new(()),
        }
    }

    /// Start an actor for `session`, replacing any previous entry.
    pub fn spawn(&self, session: Session) -> SessionHandle {
        let id = session.id;
        let (handle, _task) =
            spawn_session_actor(session, self.sink.clone(), self.save_tx.clone(), &self.config);
        self.entries.insert(
            id,
            Entry {
                handle: handle.clone(),
                idle_since: None,
            },
        );
        handle
    }

    /// Handle of a running actor, if the session is loaded and alive.
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.entries
            .get(&id)
            .map(|e| e.handle.clone())
            .filter(|h| !h.is_closed())
    }

    /// Running actor for `id`, loading the session from the store when it is
    /// not loaded or its actor has died.
    pub async fn get_or_load(&self, id: SessionId) -> Result<SessionHandle, LifecycleError> {
        if let Some(handle) = self.get(id) {
            return Ok(handle);
        }

        let _guard = self.load_lock.lock().await;
        if let Some(handle) = self.get(id) {
            return Ok(handle);
        }

        if self.entries.remove(&id).is_some() {
            tracing::warn!(session_id = %id, "Session actor exited unexpectedly, reloading");
        }

        let store = self.store.clone();
        let session = tokio::task::spawn_blocking(move || store.load_session(id))
            .await
            .map_err(|e| LifecycleError::Task(e.to_string()))??;

        tracing::info!(session_id = %id, players = session.players.len(), "Session loaded");
        Ok(self.spawn(session))
    }

    pub fn loaded(&self) -> Vec<SessionHandle> {
        self.entries
            .iter()
            .map(|e| e.handle.clone())
            .filter(|h| !h.is_closed())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Sessions that have had no live connections for at least `grace`,
    /// plus any whose actor has died. Nothing is removed here.
    pub fn sweep_idle(&self, grace: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        let mut expired = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let id = *entry.key();
            if entry.handle.is_closed() {
                expired.push(id);
                continue;
            }
            if self.sink.connection_count(id) > 0 {
                entry.idle_since = None;
                continue;
            }
            let since = *entry.idle_since.get_or_insert(now);
            if now.duration_since(since) >= grace {
                expired.push(id);
            }
        }
        expired
    }

    /// Unload `id` unless a connection attached since it was swept.
    pub async fn unload_idle(&self, id: SessionId) -> bool {
        self.unload_with(id, true).await
    }

    /// Stop the actor, write its final state and drop the entry.
    pub async fn unload(&self, id: SessionId) -> bool {
        self.unload_with(id, false).await
    }

    /// The load lock is held from stop to removal, so a concurrent
    /// `get_or_load` waits and then reads the final state from the store.
    async fn unload_with(&self, id: SessionId, idle_only: bool) -> bool {
        let _guard = self.load_lock.lock().await;
        let Some(handle) = self.entries.get(&id).map(|e| e.handle.clone()) else {
            return false;
        };
        if idle_only && !handle.is_closed() && self.sink.connection_count(id) > 0 {
            if let Some(mut entry) = self.entries.get_mut(&id) {
                entry.idle_since = None;
            }
            return false;
        }

        match handle.stop().await {
            Ok(session) => {
                if let Err(e) = self.write_final(session).await {
                    tracing::error!(session_id = %id, "Failed to persist unloaded session: {}", e);
                }
            }
            Err(_) => tracing::debug!(session_id = %id, "Actor already gone at unload"),
        }
        self.entries.remove(&id);
        tracing::info!(session_id = %id, "Session unloaded");
        true
    }

    /// Queue the final state behind any snapshots the actor already handed
    /// to the save writer and wait for it. Falls back to a direct write when
    /// the writer is gone or reports failure.
    async fn write_final(&self, session: Session) -> Result<(), LifecycleError> {
        if let Some(save_tx) = &self.save_tx {
            let (done, written) = oneshot::channel();
            let job = SaveJob {
                session: session.clone(),
                done: Some(done),
            };
            if save_tx.send(job).await.is_ok() && written.await.unwrap_or(false) {
                return Ok(());
            }
            tracing::warn!(session_id = %session.id, "Save writer unavailable, writing final state directly");
        }

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save_session(&session))
            .await
            .map_err(|e| LifecycleError::Task(e.to_string()))??;
        Ok(())
    }
}
