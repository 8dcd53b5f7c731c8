use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use session::{ConnectionId, Event, EventSink, PlayerId, SessionId};
use tokio::sync::{mpsc, oneshot};

use crate::protocol::CloseCode;

struct Slot {
    id: ConnectionId,
    /// Set by the session actor once the welcome is queued; broadcasts skip
    /// the slot until then.
    active: bool,
    tx: mpsc::Sender<String>,
    close: oneshot::Sender<CloseCode>,
}

impl Slot {
    fn kick(self, code: CloseCode) {
        let _ = self.close.send(code);
    }
}

/// Receiving side of a registered connection.
pub struct Registration {
    pub id: ConnectionId,
    /// Serialized events for this connection.
    pub outbound: mpsc::Receiver<String>,
    /// Fires when the registry drops this connection.
    pub closed: oneshot::Receiver<CloseCode>,
}

/// Live connections keyed by session then player. At most one per player per
/// session. Ids are unique per registry, so a replaced connection cannot
/// remove its successor's slot.
pub struct ConnectionRegistry {
    sessions: DashMap<SessionId, HashMap<PlayerId, Slot>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` is the per-connection outbound queue length.
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a connection, closing any previous one for the same player.
    pub fn register(&self, session_id: SessionId, player: &PlayerId) -> Registration {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, outbound) = mpsc::channel(self.buffer);
        let (close, closed) = oneshot::channel();

        let previous = self
            .sessions
            .entry(session_id)
            .or_default()
            .insert(
                player.clone(),
                Slot {
                    id,
                    active: false,
                    tx,
                    close,
                },
            );

        if let Some(old) = previous {
            tracing::info!(%session_id, %player, old = %old.id, new = %id, "Connection replaced");
            old.kick(CloseCode::Replaced);
        }
        tracing::debug!(%session_id, %player, connection = %id, "Connection registered");

        Registration { id, outbound, closed }
    }

    /// Remove the connection if it is still the registered one. Returns
    /// whether anything was removed.
    pub fn deregister(&self, session_id: SessionId, player: &PlayerId, id: ConnectionId) -> bool {
        self.take_slot(session_id, player, Some(id)).is_some()
    }

    pub fn is_connected(&self, session_id: SessionId, player: &PlayerId) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|players| players.contains_key(player))
    }

    fn take_slot(
        &self,
        session_id: SessionId,
        player: &PlayerId,
        id: Option<ConnectionId>,
    ) -> Option<Slot> {
        let slot = {
            let mut players = self.sessions.get_mut(&session_id)?;
            let current = players
                .get(player)
                .is_some_and(|slot| id.map_or(true, |id| slot.id == id));
            if current {
                players.remove(player)
            } else {
                None
            }
        };
        self.sessions
            .remove_if(&session_id, |_, players| players.is_empty());
        if slot.is_some() {
            tracing::debug!(%session_id, %player, "Connection deregistered");
        }
        slot
    }
}

impl EventSink for ConnectionRegistry {
    fn broadcast(&self, session_id: SessionId, event: &Event, exclude: Option<&PlayerId>) -> usize {
        // Recipients are copied out so no lock is held while sending.
        let recipients: Vec<(PlayerId, ConnectionId, mpsc::Sender<String>)> =
            match self.sessions.get(&session_id) {
                Some(players) => players
                    .iter()
                    .filter(|(player, slot)| slot.active && Some(*player) != exclude)
                    .map(|(player, slot)| (player.clone(), slot.id, slot.tx.clone()))
                    .collect(),
                None => return 0,
            };
        if recipients.is_empty() {
            return 0;
        }

        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(%session_id, "Failed to serialize event: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for (player, id, tx) in recipients {
            match tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%session_id, %player, "Outbound buffer full, disconnecting slow consumer");
                    if let Some(slot) = self.take_slot(session_id, &player, Some(id)) {
                        slot.kick(CloseCode::Overflow);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.take_slot(session_id, &player, Some(id));
                }
            }
        }
        delivered
    }

    fn activate(&self, session_id: SessionId, player: &PlayerId, connection: ConnectionId) {
        if let Some(mut players) = self.sessions.get_mut(&session_id) {
            if let Some(slot) = players.get_mut(player).filter(|slot| slot.id == connection) {
                slot.active = true;
            }
        }
    }

    fn connection_count(&self, session_id: SessionId) -> usize {
        self.sessions.get(&session_id).map_or(0, |p| p.len())
    }

    fn close_player(&self, session_id: SessionId, player: &PlayerId) {
        if let Some(slot) = self.take_slot(session_id, player, None) {
            slot.kick(CloseCode::Normal);
        }
    }
}
