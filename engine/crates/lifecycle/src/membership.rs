use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use session::{PlayerId, SessionId};

/// The user record's "current session" pointer. Claims are atomic, so two
/// concurrent joins by one player cannot both take it.
pub trait MembershipStore: Send + Sync {
    fn current_session_of(&self, player: &PlayerId) -> Option<SessionId>;

    /// Point `player` at `session` unless it already names another session.
    /// `Ok(true)` when newly claimed, `Ok(false)` when it already named
    /// `session`, `Err(current)` otherwise.
    fn try_claim(&self, player: &PlayerId, session: SessionId) -> Result<bool, SessionId>;

    /// Clear the pointer if it still names `session`.
    fn release(&self, player: &PlayerId, session: SessionId);
}

#[derive(Debug, Default)]
pub struct InMemoryMembership {
    current: DashMap<PlayerId, SessionId>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MembershipStore for InMemoryMembership {
    fn current_session_of(&self, player: &PlayerId) -> Option<SessionId> {
        self.current.get(player).map(|s| *s)
    }

    fn try_claim(&self, player: &PlayerId, session: SessionId) -> Result<bool, SessionId> {
        match self.current.entry(player.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(true)
            }
            Entry::Occupied(slot) if *slot.get() == session => Ok(false),
            Entry::Occupied(slot) => Err(*slot.get()),
        }
    }

    fn release(&self, player: &PlayerId, session: SessionId) {
        self.current.remove_if(player, |_, current| *current == session);
    }
}
