use std::collections::HashMap;
use std::sync::Mutex;

use session::{GameSave, PlayerId, SaveId, Session, SessionId};

use crate::error::PersistenceError;

/// Durable home for sessions and saves. Calls may block on I/O; async
/// callers go through `spawn_blocking` or the save writer.
pub trait SessionStore: Send + Sync {
    fn load_session(&self, id: SessionId) -> Result<Session, PersistenceError>;
    fn save_session(&self, session: &Session) -> Result<(), PersistenceError>;
    fn put_save(&self, save: &GameSave) -> Result<(), PersistenceError>;
    fn load_save(&self, id: SaveId) -> Result<GameSave, PersistenceError>;
    /// Saves created by `player`, oldest first.
    fn saves_by(&self, player: &PlayerId) -> Result<Vec<GameSave>, PersistenceError>;
}

/// Process-local store. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    saves: Mutex<HashMap<SaveId, GameSave>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> PersistenceError {
    PersistenceError::Io(std::io::Error::other("store lock poisoned"))
}

impl SessionStore for MemoryStore {
    fn load_session(&self, id: SessionId) -> Result<Session, PersistenceError> {
        self.sessions
            .lock()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::SessionNotFound(id))
    }

    fn save_session(&self, session: &Session) -> Result<(), PersistenceError> {
        self.sessions
            .lock()
            .map_err(poisoned)?
            .insert(session.id, session.clone());
        Ok(())
    }

    fn put_save(&self, save: &GameSave) -> Result<(), PersistenceError> {
        self.saves
            .lock()
            .map_err(poisoned)?
            .insert(save.id, save.clone());
        Ok(())
    }

    fn load_save(&self, id: SaveId) -> Result<GameSave, PersistenceError> {
        self.saves
            .lock()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::SaveNotFound(id))
    }

    fn saves_by(&self, player: &PlayerId) -> Result<Vec<GameSave>, PersistenceError> {
        let mut saves: Vec<GameSave> = self
            .saves
            .lock()
            .map_err(poisoned)?
            .values()
            .filter(|s| &s.created_by == player)
            .cloned()
            .collect();
        saves.sort_by_key(|s| s.created_at);
        Ok(saves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::{snapshot_as_save, SessionSettings};

    fn session() -> Session {
        Session::new(
            SessionId::new(),
            "h".into(),
            SessionSettings {
                name: "arena".into(),
                max_players: 4,
                is_private: false,
                password_hash: None,
            },
        )
    }

    #[test]
    fn session_roundtrip() {
        let store = MemoryStore::new();
        let s = session();
        store.save_session(&s).unwrap();
        assert_eq!(store.load_session(s.id).unwrap(), s);
    }

    #[test]
    fn missing_session_is_typed() {
        let store = MemoryStore::new();
        let id = SessionId::new();
        assert!(matches!(
            store.load_session(id),
            Err(PersistenceError::SessionNotFound(got)) if got == id
        ));
    }

    #[test]
    fn saves_filtered_by_creator() {
        let store = MemoryStore::new();
        let s = session();
        store.put_save(&snapshot_as_save(&s, "a", None, "h".into())).unwrap();
        store.put_save(&snapshot_as_save(&s, "b", None, "p".into())).unwrap();

        let mine = store.saves_by(&"h".into()).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "a");
        assert_eq!(store.load_save(mine[0].id).unwrap().name, "a");
    }
}
