use std::io;

use session::{SaveId, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("save not found: {0}")]
    SaveNotFound(SaveId),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}
