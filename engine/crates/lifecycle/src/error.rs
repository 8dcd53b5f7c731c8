use persistence::PersistenceError;
use session::{CommandError, PlayerId, SessionId};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Persistence(PersistenceError),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("player {0} is not in a session")]
    NoCurrentSession(PlayerId),

    #[error("player {player} is not in session {session}")]
    NotInSession { player: PlayerId, session: SessionId },

    #[error("player {player} is already in session {session}")]
    AlreadyInSession { player: PlayerId, session: SessionId },

    #[error("invalid session settings: {0}")]
    InvalidSettings(String),

    #[error("password hashing error: {0}")]
    PasswordHash(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<PersistenceError> for LifecycleError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::SessionNotFound(id) => LifecycleError::SessionNotFound(id),
            other => LifecycleError::Persistence(other),
        }
    }
}
