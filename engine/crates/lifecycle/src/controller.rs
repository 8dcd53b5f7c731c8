use std::sync::Arc;
use std::time::Duration;

use persistence::SessionStore;
use serde::Serialize;
use session::{
    snapshot_as_save, Command, CommandError, ConnectionId, Credentials, EventSink, GameSave,
    PlayerId, Reply, SaveId, Session, SessionHandle, SessionId, SessionSettings,
};
use tokio::sync::watch;

use crate::auth::{AuthError, Authenticator};
use crate::directory::SessionDirectory;
use crate::error::LifecycleError;
use crate::membership::MembershipStore;
use crate::password;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub default_max_players: usize,
    pub max_players_limit: usize,
    /// How long a session may sit with no live connections before it is
    /// persisted and unloaded.
    pub grace_period: Duration,
    pub reap_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_max_players: 4,
            max_players_limit: 16,
            grace_period: Duration::from_secs(30),
            reap_interval: Duration::from_secs(5),
        }
    }
}

/// Settings for a new session as requested by its host.
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    pub name: String,
    pub max_players: Option<usize>,
    pub is_private: bool,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub players: usize,
    pub max_players: usize,
    pub is_private: bool,
    pub host: Option<PlayerId>,
}

impl SessionSummary {
    pub fn of(session: &Session) -> Self {
        Self {
            id: session.id,
            name: session.name.clone(),
            players: session.players.len(),
            max_players: session.max_players,
            is_private: session.is_private,
            host: session.host().cloned(),
        }
    }
}

/// A verified player allowed to attach a live connection to a session.
#[derive(Debug, Clone)]
pub struct Admission {
    pub player: PlayerId,
    pub handle: SessionHandle,
}

/// Membership operations that span the user record and the session actor.
pub struct LifecycleController {
    directory: SessionDirectory,
    auth: Arc<dyn Authenticator>,
    membership: Arc<dyn MembershipStore>,
    store: Arc<dyn SessionStore>,
    sink: Arc<dyn EventSink>,
    config: LifecycleConfig,
}

async fn blocking<T, F>(f: F) -> Result<T, LifecycleError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LifecycleError::Task(e.to_string()))
}

impl LifecycleController {
    pub fn new(
        directory: SessionDirectory,
        auth: Arc<dyn Authenticator>,
        membership: Arc<dyn MembershipStore>,
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn EventSink>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            directory,
            auth,
            membership,
            store,
            sink,
            config,
        }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn authenticate(&self, token: &str) -> Result<PlayerId, AuthError> {
        self.auth.verify(token)
    }

    /// Create a session with `host` as its only member and Host.
    pub async fn create_session(
        &self,
        host: &PlayerId,
        request: CreateSession,
    ) -> Result<SessionSummary, LifecycleError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(LifecycleError::InvalidSettings("name must not be empty".into()));
        }
        let max_players = request.max_players.unwrap_or(self.config.default_max_players);
        if max_players == 0 || max_players > self.config.max_players_limit {
            return Err(LifecycleError::InvalidSettings(format!(
                "max_players must be between 1 and {}",
                self.config.max_players_limit
            )));
        }
        let is_private = request.is_private;
        let password = match (is_private, request.password) {
            (true, Some(pw)) if !pw.is_empty() => Some(pw),
            (true, _) => {
                return Err(LifecycleError::InvalidSettings(
                    "private sessions require a password".into(),
                ))
            }
            (false, _) => None,
        };

        let session_id = SessionId::new();
        self.claim(host, session_id).await?;
        let created = async {
            let password_hash = match password {
                Some(pw) => Some(blocking(move || password::hash_password(&pw)).await??),
                None => None,
            };
            let session = Session::new(
                session_id,
                host.clone(),
                SessionSettings {
                    name,
                    max_players,
                    is_private,
                    password_hash,
                },
            );
            let summary = SessionSummary::of(&session);
            self.persist(session.clone()).await?;
            self.directory.spawn(session);
            Ok::<_, LifecycleError>(summary)
        }
        .await;
        let summary = created.inspect_err(|_| self.membership.release(host, session_id))?;

        tracing::info!(session_id = %summary.id, %host, max_players, "Session created");
        Ok(summary)
    }

    /// Active sessions currently loaded on this node.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut out = Vec::new();
        for handle in self.directory.loaded() {
            if let Ok(session) = handle.snapshot().await {
                if session.is_active {
                    out.push(SessionSummary::of(&session));
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.0.cmp(&b.id.0)));
        out
    }

    /// Add `player` to a session, checking the password outside the actor.
    pub async fn join(
        &self,
        player: &PlayerId,
        session_id: SessionId,
        password: Option<String>,
    ) -> Result<SessionSummary, LifecycleError> {
        let newly_claimed = self.claim(player, session_id).await?;
        let joined = self.join_claimed(player, session_id, password).await;
        if joined.is_err() && newly_claimed {
            self.membership.release(player, session_id);
        }
        joined
    }

    async fn join_claimed(
        &self,
        player: &PlayerId,
        session_id: SessionId,
        password: Option<String>,
    ) -> Result<SessionSummary, LifecycleError> {
        let handle = self.directory.get_or_load(session_id).await?;
        let snapshot = handle.snapshot().await?;

        let credentials = match (snapshot.password_hash, password) {
            (None, _) => Credentials::Missing,
            (Some(_), None) => Credentials::Missing,
            (Some(hash), Some(pw)) => {
                if blocking(move || password::verify_password(&pw, &hash)).await? {
                    Credentials::Verified
                } else {
                    Credentials::Rejected
                }
            }
        };

        handle.apply(player, Command::Join { credentials }).await?;

        let after = handle.snapshot().await?;
        tracing::info!(%session_id, %player, players = after.players.len(), "Player joined session");
        Ok(SessionSummary::of(&after))
    }

    /// Remove `player` from the session and close any live connection. The
    /// membership pointer is cleared even when the player was no longer a
    /// member or the session is gone.
    pub async fn leave(&self, player: &PlayerId, session_id: SessionId) -> Result<(), LifecycleError> {
        let handle = match self.directory.get_or_load(session_id).await {
            Ok(handle) => handle,
            Err(e @ LifecycleError::SessionNotFound(_)) => {
                self.membership.release(player, session_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let left = handle.apply(player, Command::Leave).await;
        if matches!(left, Ok(_) | Err(CommandError::NotMember(_))) {
            self.membership.release(player, session_id);
            self.sink.close_player(session_id, player);
        }
        left?;

        tracing::info!(%session_id, %player, "Player left session");
        Ok(())
    }

    /// Verify a connection's token and that the player belongs to the session
    /// it is attaching to.
    pub async fn admit(&self, session_id: SessionId, token: &str) -> Result<Admission, LifecycleError> {
        let player = self.auth.verify(token)?;

        let pointer = self.membership.current_session_of(&player);
        if pointer.is_some_and(|current| current != session_id) {
            return Err(LifecycleError::NotInSession {
                player,
                session: session_id,
            });
        }

        let handle = self.directory.get_or_load(session_id).await?;
        let snapshot = handle.snapshot().await?;
        if !snapshot.is_active {
            return Err(CommandError::SessionInactive.into());
        }
        if !snapshot.is_member(&player) {
            return Err(LifecycleError::NotInSession {
                player,
                session: session_id,
            });
        }
        // A missing pointer (e.g. after a restart) is restored from the
        // persisted membership.
        if pointer.is_none() && self.membership.try_claim(&player, session_id).is_err() {
            return Err(LifecycleError::NotInSession {
                player,
                session: session_id,
            });
        }
        Ok(Admission { player, handle })
    }

    /// Announce a newly registered connection and fetch its welcome state.
    /// The actor activates `connection` in the same step, so no event older
    /// than the welcome reaches it.
    pub async fn attached(
        &self,
        admission: &Admission,
        connection: ConnectionId,
    ) -> Result<Session, LifecycleError> {
        match admission
            .handle
            .apply(&admission.player, Command::Connected { connection })
            .await?
        {
            Some(Reply::Welcome(session)) => Ok(*session),
            _ => admission
                .handle
                .snapshot()
                .await
                .map_err(LifecycleError::from),
        }
    }

    /// A live connection went away without leaving. A no-op in the actor if
    /// the player has attached a newer connection meanwhile.
    pub async fn detached(&self, admission: &Admission, connection: ConnectionId) {
        let session_id = admission.handle.session_id();
        match admission
            .handle
            .apply(&admission.player, Command::Disconnected { connection })
            .await
        {
            Ok(_) => {}
            Err(CommandError::NotMember(_)) | Err(CommandError::ActorUnavailable) => {}
            Err(e) => {
                tracing::warn!(%session_id, player = %admission.player, "Disconnect not applied: {}", e);
            }
        }
    }

    pub async fn migrate_host(
        &self,
        player: &PlayerId,
        session_id: SessionId,
        new_host: PlayerId,
    ) -> Result<(), LifecycleError> {
        let handle = self.directory.get_or_load(session_id).await?;
        handle.apply(player, Command::HostMigrate { new_host }).await?;
        Ok(())
    }

    /// Snapshot the player's current session into a named save.
    pub async fn create_save(
        &self,
        player: &PlayerId,
        name: String,
        description: Option<String>,
    ) -> Result<GameSave, LifecycleError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(LifecycleError::InvalidSettings("save name must not be empty".into()));
        }
        let session_id = self
            .membership
            .current_session_of(player)
            .ok_or_else(|| LifecycleError::NoCurrentSession(player.clone()))?;
        let handle = self.directory.get_or_load(session_id).await?;
        let session = handle.snapshot().await?;
        if !session.is_member(player) {
            return Err(LifecycleError::NotInSession {
                player: player.clone(),
                session: session_id,
            });
        }

        let save = snapshot_as_save(&session, name, description, player.clone());
        let store = self.store.clone();
        let stored = save.clone();
        blocking(move || store.put_save(&stored)).await??;

        tracing::info!(save_id = %save.id, %session_id, %player, "Game saved");
        Ok(save)
    }

    pub async fn list_saves(&self, player: &PlayerId) -> Result<Vec<GameSave>, LifecycleError> {
        let store = self.store.clone();
        let player = player.clone();
        Ok(blocking(move || store.saves_by(&player)).await??)
    }

    /// Start a fresh session from a save with `player` as host.
    pub async fn load_save(
        &self,
        player: &PlayerId,
        save_id: SaveId,
    ) -> Result<SessionSummary, LifecycleError> {
        let store = self.store.clone();
        let save = blocking(move || store.load_save(save_id)).await??;
        if save.created_by != *player {
            return Err(persistence::PersistenceError::SaveNotFound(save_id).into());
        }

        let session = Session::from_save(SessionId::new(), &save, player.clone());
        let summary = SessionSummary::of(&session);
        self.claim(player, summary.id).await?;
        if let Err(e) = self.persist(session.clone()).await {
            self.membership.release(player, summary.id);
            return Err(e);
        }
        self.directory.spawn(session);

        tracing::info!(%save_id, session_id = %summary.id, %player, "Save loaded into new session");
        Ok(summary)
    }

    /// Persist and unload sessions idle past the grace period.
    pub async fn reap_idle(&self) -> usize {
        let mut reaped = 0;
        for id in self.directory.sweep_idle(self.config.grace_period) {
            if self.directory.unload_idle(id).await {
                reaped += 1;
            }
        }
        reaped
    }

    /// Periodically reap idle sessions until shutdown is signalled.
    pub async fn run_reaper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.reap_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let reaped = self.reap_idle().await;
                    if reaped > 0 {
                        tracing::info!(reaped, loaded = self.directory.len(), "Idle sessions unloaded");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Idle reaper stopped");
    }

    /// Stop every loaded actor and persist its final state.
    pub async fn shutdown(&self) {
        let ids = self.directory.ids();
        tracing::info!(sessions = ids.len(), "Persisting sessions before exit");
        for id in ids {
            self.directory.unload(id).await;
        }
    }

    async fn persist(&self, session: Session) -> Result<(), LifecycleError> {
        let store = self.store.clone();
        blocking(move || store.save_session(&session)).await??;
        Ok(())
    }

    /// Point `player` at `target`. Fails if the pointer names another
    /// session the player still belongs to; a pointer to a session that is
    /// gone or inactive is stale and replaced. Returns whether the pointer
    /// was newly claimed.
    async fn claim(&self, player: &PlayerId, target: SessionId) -> Result<bool, LifecycleError> {
        loop {
            let current = match self.membership.try_claim(player, target) {
                Ok(newly) => return Ok(newly),
                Err(current) => current,
            };
            let stale = match self.directory.get_or_load(current).await {
                Ok(handle) => !handle.snapshot().await?.is_active,
                Err(LifecycleError::SessionNotFound(_)) => true,
                Err(e) => return Err(e),
            };
            if !stale {
                return Err(LifecycleError::AlreadyInSession {
                    player: player.clone(),
                    session: current,
                });
            }
            tracing::debug!(%player, stale = %current, "Clearing stale session pointer");
            self.membership.release(player, current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryMembership, StaticTokens};
    use persistence::MemoryStore;
    use session::{ActorConfig, EventKind, RecordingSink};

    struct Fixture {
        controller: LifecycleController,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryStore>,
        membership: Arc<InMemoryMembership>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new());
        let directory = SessionDirectory::new(
            sink.clone(),
            store.clone(),
            None,
            ActorConfig::default(),
        );
        let auth = StaticTokens::new([("tok-h", "h"), ("tok-p", "p"), ("tok-q", "q")]);
        let membership = Arc::new(InMemoryMembership::new());
        let controller = LifecycleController::new(
            directory,
            Arc::new(auth),
            membership.clone(),
            store.clone(),
            sink.clone(),
            LifecycleConfig::default(),
        );
        Fixture {
            controller,
            sink,
            store,
            membership,
        }
    }

    fn public(name: &str) -> CreateSession {
        CreateSession {
            name: name.into(),
            ..Default::default()
        }
    }

    fn pid(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    async fn is_member(f: &Fixture, session_id: SessionId, player: &str) -> bool {
        let handle = f.controller.directory().get_or_load(session_id).await.unwrap();
        handle.snapshot().await.unwrap().is_member(&pid(player))
    }

    #[tokio::test]
    async fn create_session_makes_host_member() {
        let f = fixture();
        let summary = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();
        assert_eq!(summary.host, Some(pid("h")));
        assert_eq!(summary.players, 1);
        assert_eq!(summary.max_players, 4);

        let stored = f.store.load_session(summary.id).unwrap();
        assert!(stored.is_member(&pid("h")));
        assert_eq!(f.controller.list_sessions().await, vec![summary]);
    }

    #[tokio::test]
    async fn create_session_validates_settings() {
        let f = fixture();
        let err = f.controller.create_session(&pid("h"), public("  ")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSettings(_)));

        let too_big = CreateSession {
            max_players: Some(17),
            ..public("arena")
        };
        let err = f.controller.create_session(&pid("h"), too_big).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSettings(_)));

        let no_password = CreateSession {
            is_private: true,
            ..public("arena")
        };
        let err = f.controller.create_session(&pid("h"), no_password).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSettings(_)));
    }

    #[tokio::test]
    async fn cannot_be_in_two_sessions() {
        let f = fixture();
        let a = f.controller.create_session(&pid("h"), public("a")).await.unwrap();
        let err = f.controller.create_session(&pid("h"), public("b")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyInSession { session, .. } if session == a.id));

        let b = f.controller.create_session(&pid("q"), public("b")).await.unwrap();
        let err = f.controller.join(&pid("h"), b.id, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyInSession { .. }));
    }

    #[tokio::test]
    async fn join_and_leave_update_pointer_and_broadcast() {
        let f = fixture();
        let s = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();
        let joined = f.controller.join(&pid("p"), s.id, None).await.unwrap();
        assert_eq!(joined.players, 2);

        // A second join attempt is rejected by the session itself.
        let err = f.controller.join(&pid("p"), s.id, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Command(CommandError::AlreadyMember(_))));

        f.controller.leave(&pid("p"), s.id).await.unwrap();
        let kinds: Vec<_> = f.sink.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::PlayerJoined, EventKind::PlayerLeft]);
        assert_eq!(f.sink.closed(), vec![(s.id, pid("p"))]);

        // Pointer cleared, so p can host a new session.
        f.controller.create_session(&pid("p"), public("mine")).await.unwrap();
    }

    #[tokio::test]
    async fn private_session_checks_password() {
        let f = fixture();
        let request = CreateSession {
            name: "secret".into(),
            is_private: true,
            password: Some("pw".into()),
            ..Default::default()
        };
        let s = f.controller.create_session(&pid("h"), request).await.unwrap();
        assert!(s.is_private);

        let err = f.controller.join(&pid("p"), s.id, Some("wrong".into())).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Command(CommandError::InvalidCredentials)));
        let err = f.controller.join(&pid("p"), s.id, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Command(CommandError::InvalidCredentials)));

        f.controller.join(&pid("p"), s.id, Some("pw".into())).await.unwrap();
    }

    #[tokio::test]
    async fn admit_requires_token_and_membership() {
        let f = fixture();
        let s = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();

        let err = f.controller.admit(s.id, "bogus").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Auth(AuthError::InvalidToken)));

        let err = f.controller.admit(s.id, "tok-p").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotInSession { .. }));

        let err = f.controller.admit(SessionId::new(), "tok-h").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotInSession { .. }));

        let admission = f.controller.admit(s.id, "tok-h").await.unwrap();
        assert_eq!(admission.player, pid("h"));
        let welcome = f.controller.attached(&admission, ConnectionId(1)).await.unwrap();
        assert_eq!(welcome.id, s.id);
        assert_eq!(f.sink.activated(), vec![(pid("h"), ConnectionId(1))]);
    }

    #[tokio::test]
    async fn detach_keeps_membership_and_migrates_host() {
        let f = fixture();
        let s = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();
        f.controller.join(&pid("p"), s.id, None).await.unwrap();

        let admission = f.controller.admit(s.id, "tok-h").await.unwrap();
        f.controller.attached(&admission, ConnectionId(1)).await.unwrap();
        f.controller.detached(&admission, ConnectionId(1)).await;

        let session = admission.handle.snapshot().await.unwrap();
        assert!(session.is_member(&pid("h")));
        assert_eq!(session.host(), Some(&pid("p")));

        let last = f.sink.events().last().cloned().unwrap();
        assert_eq!(last.kind, EventKind::HostChanged);
        assert_eq!(last.player_id, pid("p"));
    }

    #[tokio::test]
    async fn stale_detach_after_reconnect_keeps_host() {
        let f = fixture();
        let s = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();
        f.controller.join(&pid("p"), s.id, None).await.unwrap();

        let first = f.controller.admit(s.id, "tok-h").await.unwrap();
        f.controller.attached(&first, ConnectionId(1)).await.unwrap();
        let second = f.controller.admit(s.id, "tok-h").await.unwrap();
        f.controller.attached(&second, ConnectionId(2)).await.unwrap();

        // The replaced socket's teardown lands after the reconnect.
        f.controller.detached(&first, ConnectionId(1)).await;

        let session = second.handle.snapshot().await.unwrap();
        assert_eq!(session.host(), Some(&pid("h")));
        assert!(f.sink.events().iter().all(|e| e.kind != EventKind::HostChanged));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_admit_one_session() {
        let f = fixture();
        let a = f.controller.create_session(&pid("h"), public("a")).await.unwrap();
        let b = f.controller.create_session(&pid("q"), public("b")).await.unwrap();

        let (p1, p2) = (pid("p"), pid("p"));
        let (ja, jb) = tokio::join!(
            f.controller.join(&p1, a.id, None),
            f.controller.join(&p2, b.id, None),
        );
        assert_eq!(ja.is_ok() as u8 + jb.is_ok() as u8, 1);
        let loser = if ja.is_ok() { jb } else { ja };
        assert!(matches!(loser, Err(LifecycleError::AlreadyInSession { .. })));

        let in_a = is_member(&f, a.id, "p").await;
        let in_b = is_member(&f, b.id, "p").await;
        assert!(in_a != in_b);
        let expected = if in_a { a.id } else { b.id };
        assert_eq!(f.membership.current_session_of(&pid("p")), Some(expected));
    }

    #[tokio::test]
    async fn leave_as_non_member_clears_pointer() {
        let f = fixture();
        let s = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();
        let other = f.controller.create_session(&pid("q"), public("other")).await.unwrap();

        // An abandoned join left the pointer behind without membership.
        f.membership.try_claim(&pid("p"), s.id).unwrap();
        let err = f.controller.join(&pid("p"), other.id, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyInSession { .. }));

        let err = f.controller.leave(&pid("p"), s.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Command(CommandError::NotMember(_))));
        assert_eq!(f.membership.current_session_of(&pid("p")), None);
        f.controller.join(&pid("p"), other.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn leave_of_missing_session_clears_pointer() {
        let f = fixture();
        let gone = SessionId::new();
        f.membership.try_claim(&pid("p"), gone).unwrap();

        let err = f.controller.leave(&pid("p"), gone).await.unwrap_err();
        assert!(matches!(err, LifecycleError::SessionNotFound(_)));
        assert_eq!(f.membership.current_session_of(&pid("p")), None);
    }

    #[tokio::test]
    async fn failed_join_releases_claim() {
        let f = fixture();
        let request = CreateSession {
            name: "secret".into(),
            is_private: true,
            password: Some("pw".into()),
            ..Default::default()
        };
        let s = f.controller.create_session(&pid("h"), request).await.unwrap();
        f.controller.join(&pid("p"), s.id, Some("wrong".into())).await.unwrap_err();
        assert_eq!(f.membership.current_session_of(&pid("p")), None);
    }

    #[tokio::test]
    async fn saves_round_trip_into_new_session() {
        let f = fixture();
        let s = f.controller.create_session(&pid("h"), public("arena")).await.unwrap();

        let save = f
            .controller
            .create_save(&pid("h"), "checkpoint".into(), Some("before boss".into()))
            .await
            .unwrap();
        assert_eq!(save.session_id, s.id);
        assert_eq!(f.controller.list_saves(&pid("h")).await.unwrap().len(), 1);
        assert!(f.controller.list_saves(&pid("p")).await.unwrap().is_empty());

        // Still in the original session.
        let err = f.controller.load_save(&pid("h"), save.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyInSession { .. }));

        f.controller.leave(&pid("h"), s.id).await.unwrap();
        let loaded = f.controller.load_save(&pid("h"), save.id).await.unwrap();
        assert_ne!(loaded.id, s.id);
        assert_eq!(loaded.name, "checkpoint (Loaded)");
        assert_eq!(loaded.host, Some(pid("h")));

        // Another player's save cannot be loaded.
        let err = f.controller.load_save(&pid("p"), save.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Persistence(_)));
    }

    #[tokio::test]
    async fn create_save_without_session_fails() {
        let f = fixture();
        let err = f
            .controller
            .create_save(&pid("p"), "x".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NoCurrentSession(_)));
    }

    #[tokio::test]
    async fn reaper_persists_and_reload_restores() {
        let mut config = LifecycleConfig::default();
        config.grace_period = Duration::ZERO;
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new());
        let controller = LifecycleController::new(
            SessionDirectory::new(sink.clone(), store.clone(), None, ActorConfig::default()),
            Arc::new(StaticTokens::new([("tok-h", "h"), ("tok-p", "p")])),
            Arc::new(InMemoryMembership::new()),
            store.clone(),
            sink,
            config,
        );

        let s = controller.create_session(&pid("h"), public("arena")).await.unwrap();
        controller.join(&pid("p"), s.id, None).await.unwrap();

        assert_eq!(controller.reap_idle().await, 1);
        assert!(controller.directory().is_empty());
        assert_eq!(store.load_session(s.id).unwrap().players.len(), 2);

        // Attaching reloads the session.
        let admission = controller.admit(s.id, "tok-p").await.unwrap();
        assert_eq!(admission.handle.snapshot().await.unwrap().players.len(), 2);
    }
}
