use std::sync::Arc;
use std::time::{Duration, Instant};

use observability::CommandMetrics;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::command::{Command, Reply};
use crate::error::CommandError;
use crate::live::LiveSession;
use crate::model::{PlayerId, Session, SessionId};
use crate::sink::EventSink;

/// A snapshot for the save writer. `done` hears whether it was written;
/// jobs for one session are written in the order they were queued.
#[derive(Debug)]
pub struct SaveJob {
    pub session: Session,
    pub done: Option<oneshot::Sender<bool>>,
}

impl SaveJob {
    pub fn snapshot(session: Session) -> Self {
        Self {
            session,
            done: None,
        }
    }
}

pub type SaveTx = mpsc::Sender<SaveJob>;
pub type SaveRx = mpsc::Receiver<SaveJob>;

#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// Pending requests before senders wait.
    pub mailbox_capacity: usize,
    /// How often non-structural changes (positions, hits) are flushed to the
    /// save writer.
    pub flush_interval: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            flush_interval: Duration::from_secs(1),
        }
    }
}

enum Request {
    Apply {
        player: PlayerId,
        command: Command,
        reply: oneshot::Sender<Result<Option<Reply>, CommandError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Session>,
    },
    Stop {
        reply: oneshot::Sender<Session>,
    },
}

/// Cloneable address of one running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// True once the actor has exited (stopped or crashed).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a command and wait for its result. Commands are applied in the
    /// order the actor accepts them.
    pub async fn apply(
        &self,
        player: &PlayerId,
        command: Command,
    ) -> Result<Option<Reply>, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Apply {
                player: player.clone(),
                command,
                reply,
            })
            .await
            .map_err(|_| CommandError::ActorUnavailable)?;
        rx.await.map_err(|_| CommandError::ActorUnavailable)?
    }

    /// Copy of the current state, ordered after every command queued before it.
    pub async fn snapshot(&self) -> Result<Session, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot { reply })
            .await
            .map_err(|_| CommandError::ActorUnavailable)?;
        rx.await.map_err(|_| CommandError::ActorUnavailable)
    }

    /// Stop the actor and return its final state for persisting.
    pub async fn stop(&self) -> Result<Session, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Stop { reply })
            .await
            .map_err(|_| CommandError::ActorUnavailable)?;
        rx.await.map_err(|_| CommandError::ActorUnavailable)
    }
}

/// Spawn the single writer for `session`.
pub fn spawn_session_actor(
    session: Session,
    sink: Arc<dyn EventSink>,
    save_tx: Option<SaveTx>,
    config: &ActorConfig,
) -> (SessionHandle, JoinHandle<()>) {
    let session_id = session.id;
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let flush_interval = config.flush_interval;

    let handle = tokio::spawn(async move {
        run_session_actor(LiveSession::new(session), rx, sink, save_tx, flush_interval).await;
    });

    tracing::info!(%session_id, "Session actor started");
    (SessionHandle { session_id, tx }, handle)
}

async fn run_session_actor(
    mut live: LiveSession,
    mut rx: mpsc::Receiver<Request>,
    sink: Arc<dyn EventSink>,
    save_tx: Option<SaveTx>,
    flush_interval: Duration,
) {
    let session_id = live.session.id;
    let mut dirty = false;
    let mut flush = tokio::time::interval(flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                match request {
                    Request::Apply { player, command, reply } => {
                        let started = Instant::now();
                        let name = command.name();
                        let mut deliveries = 0;

                        let response = match live.apply(&player, command) {
                            Ok(outcome) => {
                                if let Some(connection) = outcome.activate {
                                    sink.activate(session_id, &player, connection);
                                }
                                // Fan-out happens before the reply so the sender
                                // never observes its own result ahead of the event.
                                for d in &outcome.deliveries {
                                    sink.broadcast(session_id, &d.event, d.exclude.as_ref());
                                    deliveries += 1;
                                }
                                if outcome.structural {
                                    queue_save(&save_tx, &live.session);
                                    dirty = false;
                                } else if outcome.mutated {
                                    dirty = true;
                                }
                                Ok(outcome.reply)
                            }
                            Err(e) => {
                                tracing::debug!(%session_id, %player, command = name, "Command rejected: {}", e);
                                Err(e)
                            }
                        };

                        CommandMetrics {
                            session_id: session_id.to_string(),
                            command: name,
                            duration_us: started.elapsed().as_micros(),
                            deliveries,
                            accepted: response.is_ok(),
                        }
                        .log();

                        let _ = reply.send(response);
                    }
                    Request::Snapshot { reply } => {
                        let _ = reply.send(live.session.clone());
                    }
                    Request::Stop { reply } => {
                        dirty = false;
                        let _ = reply.send(live.session.clone());
                        break;
                    }
                }
            }
            _ = flush.tick() => {
                if dirty {
                    queue_save(&save_tx, &live.session);
                    dirty = false;
                }
            }
        }
    }

    if dirty {
        queue_save(&save_tx, &live.session);
    }
    tracing::info!(%session_id, "Session actor stopped");
}

/// Best-effort handoff to the save writer; never waits.
fn queue_save(save_tx: &Option<SaveTx>, session: &Session) {
    let Some(tx) = save_tx else { return };
    match tx.try_send(SaveJob::snapshot(session.clone())) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(session_id = %session.id, "Save queue full, snapshot skipped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(session_id = %session.id, "Save writer gone, snapshot dropped");
        }
    }
}
