use std::fmt;
use std::sync::Mutex;

use crate::command::Event;
use crate::model::{PlayerId, SessionId};

/// One live connection of a player. Issued in increasing order, so a newer
/// connection always has a larger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fan-out seam between session actors and live connections.
pub trait EventSink: Send + Sync {
    /// Deliver `event` to every live connection of the session except
    /// `exclude`. Returns the number of connections it was handed to.
    fn broadcast(&self, session_id: SessionId, event: &Event, exclude: Option<&PlayerId>) -> usize;

    /// Start delivering events to a registered connection. Called by the
    /// actor in the same step that builds the connection's welcome snapshot,
    /// so earlier events are never delivered after it.
    fn activate(&self, session_id: SessionId, player: &PlayerId, connection: ConnectionId);

    /// Live connections currently registered for the session.
    fn connection_count(&self, session_id: SessionId) -> usize;

    /// Close one player's live connection, if any.
    fn close_player(&self, session_id: SessionId, player: &PlayerId);
}

/// Sink with no connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn broadcast(&self, _session_id: SessionId, _event: &Event, _exclude: Option<&PlayerId>) -> usize {
        0
    }

    fn activate(&self, _session_id: SessionId, _player: &PlayerId, _connection: ConnectionId) {}

    fn connection_count(&self, _session_id: SessionId) -> usize {
        0
    }

    fn close_player(&self, _session_id: SessionId, _player: &PlayerId) {}
}

/// Records every broadcast in order. Handy for driving actors without a
/// network layer.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(SessionId, Event, Option<PlayerId>)>>,
    closed: Mutex<Vec<(SessionId, PlayerId)>>,
    activated: Mutex<Vec<(PlayerId, ConnectionId)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<(SessionId, Event, Option<PlayerId>)> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.deliveries().into_iter().map(|(_, e, _)| e).collect()
    }

    pub fn closed(&self) -> Vec<(SessionId, PlayerId)> {
        self.closed.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn activated(&self) -> Vec<(PlayerId, ConnectionId)> {
        self.activated.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn broadcast(&self, session_id: SessionId, event: &Event, exclude: Option<&PlayerId>) -> usize {
        if let Ok(mut d) = self.deliveries.lock() {
            d.push((session_id, event.clone(), exclude.cloned()));
        }
        1
    }

    fn activate(&self, _session_id: SessionId, player: &PlayerId, connection: ConnectionId) {
        if let Ok(mut a) = self.activated.lock() {
            a.push((player.clone(), connection));
        }
    }

    fn connection_count(&self, _session_id: SessionId) -> usize {
        0
    }

    fn close_player(&self, session_id: SessionId, player: &PlayerId) {
        if let Ok(mut c) = self.closed.lock() {
            c.push((session_id, player.clone()));
        }
    }
}
