use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use session::{GameSave, PlayerId, SaveId, Session, SessionId};

use crate::error::PersistenceError;
use crate::store::SessionStore;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// JSON-file store: `<dir>/sessions/<id>.json` and `<dir>/saves/<id>.json`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn saves_dir(&self) -> PathBuf {
        self.root.join("saves")
    }

    fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf, PersistenceError> {
        std::fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec_pretty(value)?;

        // Write to temp file first, then rename for atomicity
        let path = dir.join(format!("{}.json", name));
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = dir.join(format!("{}.json.{}.tmp", name, seq));
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &path)?;

        tracing::debug!(bytes = bytes.len(), path = %path.display(), "Record written");
        Ok(path)
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionStore for FileStore {
    fn load_session(&self, id: SessionId) -> Result<Session, PersistenceError> {
        let path = self.sessions_dir().join(format!("{}.json", id));
        Self::read_json(&path)?.ok_or(PersistenceError::SessionNotFound(id))
    }

    fn save_session(&self, session: &Session) -> Result<(), PersistenceError> {
        Self::write_json(&self.sessions_dir(), &session.id.to_string(), session)?;
        Ok(())
    }

    fn put_save(&self, save: &GameSave) -> Result<(), PersistenceError> {
        let path = Self::write_json(&self.saves_dir(), &save.id.to_string(), save)?;
        tracing::info!(save_id = %save.id, path = %path.display(), "Game saved");
        Ok(())
    }

    fn load_save(&self, id: SaveId) -> Result<GameSave, PersistenceError> {
        let path = self.saves_dir().join(format!("{}.json", id));
        Self::read_json(&path)?.ok_or(PersistenceError::SaveNotFound(id))
    }

    fn saves_by(&self, player: &PlayerId) -> Result<Vec<GameSave>, PersistenceError> {
        let dir = self.saves_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut saves = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(save) = Self::read_json::<GameSave>(&path)? {
                if &save.created_by == player {
                    saves.push(save);
                }
            }
        }
        saves.sort_by_key(|s| s.created_at);
        Ok(saves)
    }
}
