use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use session::{SaveJob, SaveRx, Session, SessionId};
use tokio::sync::oneshot;

use crate::store::SessionStore;

/// Newest queued snapshot of one session plus everyone waiting on it.
struct Pending {
    session: Session,
    waiters: Vec<oneshot::Sender<bool>>,
}

/// Drains actor snapshots and writes them off the async runtime. Queued
/// snapshots of the same session collapse to the newest one. Batches are
/// written one after another, so a later job for a session never lands
/// before an earlier one.
pub async fn run_save_writer(mut save_rx: SaveRx, store: Arc<dyn SessionStore>) {
    while let Some(first) = save_rx.recv().await {
        let mut batch: BTreeMap<SessionId, Pending> = BTreeMap::new();
        collect(&mut batch, first);
        while let Ok(next) = save_rx.try_recv() {
            collect(&mut batch, next);
        }

        let store = store.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut written = Vec::with_capacity(batch.len());
            for (id, pending) in batch {
                let ok = match store.save_session(&pending.session) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(session_id = %id, "Session save failed: {}", e);
                        false
                    }
                };
                written.push((pending.waiters, ok));
            }
            written
        })
        .await;

        match result {
            Ok(written) => {
                tracing::debug!(count = written.len(), "Save batch written");
                for (waiters, ok) in written {
                    for done in waiters {
                        let _ = done.send(ok);
                    }
                }
            }
            // Waiters are dropped with the batch and see the writer as failed.
            Err(e) => tracing::error!("Save batch panicked: {}", e),
        }
    }

    tracing::info!("Save writer shutting down");
}

fn collect(batch: &mut BTreeMap<SessionId, Pending>, job: SaveJob) {
    let SaveJob { session, done } = job;
    match batch.entry(session.id) {
        Entry::Vacant(slot) => {
            slot.insert(Pending {
                session,
                waiters: done.into_iter().collect(),
            });
        }
        Entry::Occupied(mut slot) => {
            let pending = slot.get_mut();
            pending.session = session;
            pending.waiters.extend(done);
        }
    }
}
