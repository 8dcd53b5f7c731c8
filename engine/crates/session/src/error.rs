use thiserror::Error;

use crate::model::PlayerId;

/// Why a command was refused. Reported to the sender only; a refused
/// command never mutates state or broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("player {0} is not a member of this session")]
    NotMember(PlayerId),

    #[error("player {0} is already a member of this session")]
    AlreadyMember(PlayerId),

    #[error("session is full")]
    SessionFull,

    #[error("invalid session password")]
    InvalidCredentials,

    #[error("session is no longer active")]
    SessionInactive,

    #[error("only the host may do that")]
    NotHost,

    #[error("player {0} is not alive")]
    PlayerDead(PlayerId),

    #[error("invalid command: {0}")]
    Validation(String),

    #[error("session actor is unavailable")]
    ActorUnavailable,
}

impl CommandError {
    /// Stable code carried in `error` replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotMember(_) => "not_member",
            Self::AlreadyMember(_) => "already_member",
            Self::SessionFull => "session_full",
            Self::InvalidCredentials => "invalid_credentials",
            Self::SessionInactive => "session_inactive",
            Self::NotHost => "not_host",
            Self::PlayerDead(_) => "player_dead",
            Self::Validation(_) => "validation_error",
            Self::ActorUnavailable => "internal_error",
        }
    }
}
