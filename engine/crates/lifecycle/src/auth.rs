use std::collections::HashMap;

use session::PlayerId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingToken,

    #[error("invalid or expired credential")]
    InvalidToken,
}

/// Credential verification collaborator. Issuing tokens happens elsewhere.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<PlayerId, AuthError>;
}

/// Fixed bearer-token table, typically loaded from config.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    tokens: HashMap<String, PlayerId>,
}

impl StaticTokens {
    pub fn new<I, T, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<String>,
    {
        Self {
            tokens: entries
                .into_iter()
                .map(|(t, p)| (t.into(), PlayerId::new(p)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokens {
    fn verify(&self, token: &str) -> Result<PlayerId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}
