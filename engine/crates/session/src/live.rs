use std::collections::BTreeMap;

use chrono::Utc;

use crate::command::{Command, Credentials, Delivery, Event, GameAction, Outcome, Reply};
use crate::error::CommandError;
use crate::model::{PlayerId, PlayerRole, Position, Session};
use crate::sink::ConnectionId;

/// A loaded session plus the current live connection of each attached
/// member. Owned by exactly one actor.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session: Session,
    connected: BTreeMap<PlayerId, ConnectionId>,
}

impl LiveSession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            connected: BTreeMap::new(),
        }
    }

    pub fn is_connected(&self, player: &PlayerId) -> bool {
        self.connected.contains_key(player)
    }

    /// Validate and apply one command. On error nothing has changed.
    pub fn apply(&mut self, player: &PlayerId, command: Command) -> Result<Outcome, CommandError> {
        let outcome = match command {
            Command::PositionUpdate { position } => self.position_update(player, position)?,
            Command::GameAction(action) => self.game_action(player, action)?,
            Command::Join { credentials } => self.join(player, credentials)?,
            Command::Leave => self.leave(player)?,
            Command::HostMigrate { new_host } => self.host_migrate(player, &new_host)?,
            Command::Connected { connection } => self.connect(player, connection)?,
            Command::Disconnected { connection } => self.disconnect(player, connection),
        };
        debug_assert!(self.session.invariants_hold());
        Ok(outcome)
    }

    fn require_member(&self, player: &PlayerId) -> Result<(), CommandError> {
        if self.session.is_member(player) {
            Ok(())
        } else {
            Err(CommandError::NotMember(player.clone()))
        }
    }

    fn position_update(
        &mut self,
        player: &PlayerId,
        position: Position,
    ) -> Result<Outcome, CommandError> {
        let state = self
            .session
            .players
            .get_mut(player)
            .ok_or_else(|| CommandError::NotMember(player.clone()))?;
        state.position = position;
        state.last_updated = Utc::now();
        self.session.touch();

        Ok(Outcome {
            deliveries: vec![Delivery::to_others(
                Event::position_update(player, position),
                player,
            )],
            mutated: true,
            ..Outcome::default()
        })
    }

    fn game_action(&mut self, player: &PlayerId, action: GameAction) -> Result<Outcome, CommandError> {
        let alive = self
            .session
            .players
            .get(player)
            .map(|p| p.is_alive)
            .ok_or_else(|| CommandError::NotMember(player.clone()))?;
        if !alive {
            return Err(CommandError::PlayerDead(player.clone()));
        }

        let mut mutated = false;
        if action.action == "shoot" {
            if let Some(hit) = &action.target_hit {
                if let Some(target) = self.session.players.get_mut(&hit.player_id) {
                    let killed = target.apply_damage(hit.damage);
                    mutated = true;
                    tracing::debug!(
                        session_id = %self.session.id,
                        shooter = %player,
                        target = %hit.player_id,
                        damage = hit.damage,
                        health = target.health,
                        killed,
                        "shot landed"
                    );
                }
            }
        }
        if mutated {
            self.session.touch();
        }

        Ok(Outcome {
            deliveries: vec![Delivery::to_others(
                Event::game_action(player, action.raw),
                player,
            )],
            mutated,
            ..Outcome::default()
        })
    }

    fn join(&mut self, player: &PlayerId, credentials: Credentials) -> Result<Outcome, CommandError> {
        if !self.session.is_active {
            return Err(CommandError::SessionInactive);
        }
        if self.session.is_member(player) {
            return Err(CommandError::AlreadyMember(player.clone()));
        }
        if self.session.is_full() {
            return Err(CommandError::SessionFull);
        }
        if self.session.is_private && credentials != Credentials::Verified {
            return Err(CommandError::InvalidCredentials);
        }

        self.session.insert_player(player.clone(), PlayerRole::Player);

        Ok(Outcome {
            deliveries: vec![Delivery::to_others(
                Event::player_joined(player, PlayerRole::Player),
                player,
            )],
            mutated: true,
            structural: true,
            ..Outcome::default()
        })
    }

    fn leave(&mut self, player: &PlayerId) -> Result<Outcome, CommandError> {
        let (_, role) = self
            .session
            .remove_player(player)
            .ok_or_else(|| CommandError::NotMember(player.clone()))?;
        self.connected.remove(player);

        let mut deliveries = vec![Delivery::to_others(Event::player_left(player), player)];

        if self.session.players.is_empty() {
            self.session.is_active = false;
            deliveries.push(Delivery::to_all(Event::session_closed(player)));
            tracing::info!(session_id = %self.session.id, "Last player left, session closed");
        } else if role == PlayerRole::Host {
            let connected = &self.connected;
            if let Some(new_host) = self.session.promote_host(player, |id| connected.contains_key(id)) {
                deliveries.push(Delivery::to_others(
                    Event::host_changed(&new_host, player),
                    player,
                ));
            }
        }

        Ok(Outcome {
            deliveries,
            reply: Some(Reply::Left),
            mutated: true,
            structural: true,
            ..Outcome::default()
        })
    }

    fn host_migrate(&mut self, player: &PlayerId, new_host: &PlayerId) -> Result<Outcome, CommandError> {
        self.require_member(player)?;
        if self.session.role_of(player) != Some(PlayerRole::Host) {
            return Err(CommandError::NotHost);
        }
        if new_host == player {
            return Err(CommandError::Validation("already host".into()));
        }
        if !self.session.is_member(new_host) {
            return Err(CommandError::NotMember(new_host.clone()));
        }

        self.session.set_host(new_host);

        Ok(Outcome {
            deliveries: vec![Delivery::to_all(Event::host_changed(new_host, player))],
            mutated: true,
            structural: true,
            ..Outcome::default()
        })
    }

    fn connect(&mut self, player: &PlayerId, connection: ConnectionId) -> Result<Outcome, CommandError> {
        if !self.session.is_active {
            return Err(CommandError::SessionInactive);
        }
        self.require_member(player)?;
        self.connected.insert(player.clone(), connection);

        Ok(Outcome {
            deliveries: vec![Delivery::to_others(Event::player_connected(player), player)],
            reply: Some(Reply::Welcome(Box::new(self.session.clone()))),
            activate: Some(connection),
            ..Outcome::default()
        })
    }

    fn disconnect(&mut self, player: &PlayerId, connection: ConnectionId) -> Outcome {
        if self.connected.get(player) != Some(&connection) {
            tracing::debug!(
                session_id = %self.session.id,
                %player,
                %connection,
                "Stale disconnect ignored"
            );
            return Outcome::default();
        }
        self.connected.remove(player);

        let mut outcome = Outcome::default();
        outcome
            .deliveries
            .push(Delivery::to_all(Event::player_disconnected(player)));

        let was_host = self.session.role_of(player) == Some(PlayerRole::Host);
        if was_host && self.session.players.len() > 1 {
            let connected = &self.connected;
            if let Some(new_host) = self.session.promote_host(player, |id| connected.contains_key(id)) {
                tracing::info!(
                    session_id = %self.session.id,
                    previous = %player,
                    new_host = %new_host,
                    "Host disconnected, role migrated"
                );
                outcome
                    .deliveries
                    .push(Delivery::to_all(Event::host_changed(&new_host, player)));
                outcome.mutated = true;
                outcome.structural = true;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{EventKind, TargetHit};
    use crate::model::{SessionId, SessionSettings};
    use serde_json::json;

    fn live(max_players: usize, is_private: bool) -> LiveSession {
        LiveSession::new(Session::new(
            SessionId::new(),
            "h".into(),
            SessionSettings {
                name: "arena".into(),
                max_players,
                is_private,
                password_hash: None,
            },
        ))
    }

    fn join(l: &mut LiveSession, p: &str) -> Result<Outcome, CommandError> {
        l.apply(
            &p.into(),
            Command::Join {
                credentials: Credentials::Missing,
            },
        )
    }

    fn shoot(target: &str, damage: i64) -> Command {
        let raw = json!({"action": "shoot", "target_hit": {"player_id": target, "damage": damage}});
        Command::GameAction(GameAction::from_payload(raw).unwrap())
    }

    #[test]
    fn join_respects_capacity() {
        let mut l = live(2, false);
        assert!(join(&mut l, "p").is_ok());
        assert_eq!(join(&mut l, "q"), Err(CommandError::SessionFull));
        assert_eq!(l.session.players.len(), 2);
    }

    #[test]
    fn join_twice_rejected() {
        let mut l = live(4, false);
        join(&mut l, "p").unwrap();
        assert_eq!(join(&mut l, "p"), Err(CommandError::AlreadyMember("p".into())));
    }

    #[test]
    fn private_session_needs_verified_credentials() {
        let mut l = live(4, true);
        for credentials in [Credentials::Missing, Credentials::Rejected] {
            let res = l.apply(&"p".into(), Command::Join { credentials });
            assert_eq!(res, Err(CommandError::InvalidCredentials));
        }
        let res = l.apply(
            &"p".into(),
            Command::Join {
                credentials: Credentials::Verified,
            },
        );
        assert!(res.is_ok());
        assert_eq!(l.session.role_of(&"p".into()), Some(PlayerRole::Player));
    }

    #[test]
    fn join_event_excludes_joiner() {
        let mut l = live(4, false);
        let out = join(&mut l, "p").unwrap();
        assert_eq!(out.deliveries.len(), 1);
        assert_eq!(out.deliveries[0].event.kind, EventKind::PlayerJoined);
        assert_eq!(out.deliveries[0].exclude, Some("p".into()));
        assert!(out.structural);
    }

    #[test]
    fn position_update_requires_membership() {
        let mut l = live(4, false);
        let cmd = Command::PositionUpdate {
            position: Position::new(3.0, 4.0),
        };
        assert_eq!(
            l.apply(&"stranger".into(), cmd.clone()),
            Err(CommandError::NotMember("stranger".into()))
        );

        let out = l.apply(&"h".into(), cmd).unwrap();
        assert_eq!(l.session.players[&PlayerId::from("h")].position, Position::new(3.0, 4.0));
        assert_eq!(out.deliveries[0].exclude, Some("h".into()));
        assert!(out.mutated);
        assert!(!out.structural);
    }

    #[test]
    fn shoot_damages_target_until_dead() {
        let mut l = live(2, false);
        join(&mut l, "p").unwrap();

        let out = l.apply(&"p".into(), shoot("h", 40)).unwrap();
        assert!(out.reply.is_none());
        assert_eq!(out.deliveries[0].event.kind, EventKind::GameAction);
        assert_eq!(out.deliveries[0].exclude, Some("p".into()));
        let host = &l.session.players[&PlayerId::from("h")];
        assert_eq!(host.health, 60);
        assert!(host.is_alive);

        l.apply(&"p".into(), shoot("h", 70)).unwrap();
        let host = &l.session.players[&PlayerId::from("h")];
        assert_eq!(host.health, -10);
        assert!(!host.is_alive);
    }

    #[test]
    fn dead_player_cannot_act() {
        let mut l = live(2, false);
        join(&mut l, "p").unwrap();
        l.apply(&"p".into(), shoot("h", 100)).unwrap();
        assert_eq!(
            l.apply(&"h".into(), shoot("p", 1)),
            Err(CommandError::PlayerDead("h".into()))
        );
    }

    #[test]
    fn non_combat_action_still_broadcasts() {
        let mut l = live(2, false);
        let action = GameAction::from_payload(json!({"action": "pickup", "item": 3})).unwrap();
        let out = l.apply(&"h".into(), Command::GameAction(action)).unwrap();
        assert!(!out.mutated);
        assert_eq!(out.deliveries[0].event.payload["item"], 3);
    }

    #[test]
    fn shot_at_unknown_target_is_ignored() {
        let mut l = live(2, false);
        let out = l.apply(&"h".into(), shoot("ghost", 50)).unwrap();
        assert!(!out.mutated);
        assert_eq!(out.deliveries.len(), 1);
    }

    #[test]
    fn host_leave_promotes_lowest_id() {
        let mut l = live(4, false);
        join(&mut l, "q").unwrap();
        join(&mut l, "p").unwrap();

        let out = l.apply(&"h".into(), Command::Leave).unwrap();
        assert_eq!(out.reply, Some(Reply::Left));
        let kinds: Vec<EventKind> = out.deliveries.iter().map(|d| d.event.kind).collect();
        assert_eq!(kinds, vec![EventKind::PlayerLeft, EventKind::HostChanged]);
        assert_eq!(l.session.host(), Some(&PlayerId::from("p")));
        assert!(l.session.is_active);
    }

    #[test]
    fn last_leave_closes_session() {
        let mut l = live(4, false);
        let out = l.apply(&"h".into(), Command::Leave).unwrap();
        let kinds: Vec<EventKind> = out.deliveries.iter().map(|d| d.event.kind).collect();
        assert_eq!(kinds, vec![EventKind::PlayerLeft, EventKind::SessionClosed]);
        assert!(!l.session.is_active);
        assert_eq!(join(&mut l, "p"), Err(CommandError::SessionInactive));
    }

    #[test]
    fn non_host_leave_keeps_host() {
        let mut l = live(4, false);
        join(&mut l, "p").unwrap();
        let out = l.apply(&"p".into(), Command::Leave).unwrap();
        assert_eq!(out.deliveries.len(), 1);
        assert_eq!(l.session.host(), Some(&PlayerId::from("h")));
    }

    #[test]
    fn host_migrate_rules() {
        let mut l = live(4, false);
        join(&mut l, "p").unwrap();

        assert_eq!(
            l.apply(&"p".into(), Command::HostMigrate { new_host: "p".into() }),
            Err(CommandError::NotHost)
        );
        assert_eq!(
            l.apply(&"h".into(), Command::HostMigrate { new_host: "x".into() }),
            Err(CommandError::NotMember("x".into()))
        );

        let out = l
            .apply(&"h".into(), Command::HostMigrate { new_host: "p".into() })
            .unwrap();
        assert_eq!(out.deliveries[0].exclude, None);
        assert_eq!(l.session.host(), Some(&PlayerId::from("p")));
        assert_eq!(l.session.role_of(&"h".into()), Some(PlayerRole::Player));
    }

    fn connected(id: u64) -> Command {
        Command::Connected {
            connection: ConnectionId(id),
        }
    }

    fn disconnected(id: u64) -> Command {
        Command::Disconnected {
            connection: ConnectionId(id),
        }
    }

    #[test]
    fn connect_replies_with_welcome() {
        let mut l = live(4, false);
        let out = l.apply(&"h".into(), connected(1)).unwrap();
        assert!(matches!(out.reply, Some(Reply::Welcome(_))));
        assert_eq!(out.activate, Some(ConnectionId(1)));
        assert!(l.is_connected(&"h".into()));
        assert_eq!(
            l.apply(&"x".into(), connected(2)),
            Err(CommandError::NotMember("x".into()))
        );
    }

    #[test]
    fn host_disconnect_migrates_to_connected_member() {
        let mut l = live(4, false);
        join(&mut l, "a").unwrap();
        join(&mut l, "p").unwrap();
        l.apply(&"h".into(), connected(1)).unwrap();
        l.apply(&"p".into(), connected(2)).unwrap();

        let out = l.apply(&"h".into(), disconnected(1)).unwrap();
        let kinds: Vec<EventKind> = out.deliveries.iter().map(|d| d.event.kind).collect();
        assert_eq!(kinds, vec![EventKind::PlayerDisconnected, EventKind::HostChanged]);
        // "a" sorts first but is offline
        assert_eq!(l.session.host(), Some(&PlayerId::from("p")));
        assert!(l.session.is_member(&"h".into()));
    }

    #[test]
    fn lone_host_disconnect_keeps_role() {
        let mut l = live(4, false);
        l.apply(&"h".into(), connected(1)).unwrap();
        let out = l.apply(&"h".into(), disconnected(1)).unwrap();
        assert_eq!(out.deliveries.len(), 1);
        assert_eq!(l.session.host(), Some(&PlayerId::from("h")));
    }

    #[test]
    fn disconnect_of_replaced_connection_is_ignored() {
        let mut l = live(4, false);
        join(&mut l, "p").unwrap();
        l.apply(&"h".into(), connected(1)).unwrap();
        l.apply(&"p".into(), connected(2)).unwrap();
        // Host reconnects before the old socket's disconnect is applied.
        l.apply(&"h".into(), connected(3)).unwrap();

        let out = l.apply(&"h".into(), disconnected(1)).unwrap();
        assert!(out.deliveries.is_empty());
        assert!(!out.mutated);
        assert!(l.is_connected(&"h".into()));
        assert_eq!(l.session.host(), Some(&PlayerId::from("h")));

        let out = l.apply(&"h".into(), disconnected(3)).unwrap();
        assert_eq!(out.deliveries[0].event.kind, EventKind::PlayerDisconnected);
        assert_eq!(l.session.host(), Some(&PlayerId::from("p")));
    }

    #[test]
    fn extreme_damage_does_not_panic() {
        let mut l = live(2, false);
        join(&mut l, "p").unwrap();

        l.apply(&"p".into(), shoot("h", i64::MAX)).unwrap();
        l.apply(&"p".into(), shoot("h", i64::MAX)).unwrap();
        let host = &l.session.players[&PlayerId::from("h")];
        assert_eq!(host.health, i64::MIN);
        assert!(!host.is_alive);

        l.apply(&"h".into(), Command::Leave).unwrap();
        join(&mut l, "q").unwrap();
        l.apply(&"p".into(), shoot("q", i64::MIN)).unwrap();
        let q = &l.session.players[&PlayerId::from("q")];
        assert_eq!(q.health, i64::MAX);
        assert!(q.is_alive);
        assert!(l.session.invariants_hold());
    }

    #[test]
    fn refused_command_leaves_state_untouched() {
        let mut l = live(1, false);
        let before = l.session.clone();
        assert!(join(&mut l, "p").is_err());
        let hit = TargetHit {
            player_id: "h".into(),
            damage: 10,
        };
        let action = GameAction {
            action: "shoot".into(),
            target_hit: Some(hit),
            raw: json!({}),
        };
        assert!(l.apply(&"ghost".into(), Command::GameAction(action)).is_err());
        assert_eq!(l.session, before);
    }
}
