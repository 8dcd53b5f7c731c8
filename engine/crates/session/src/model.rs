use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Health a freshly joined player starts with.
pub const DEFAULT_HEALTH: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaveId(pub Uuid);

impl SaveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SaveId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SaveId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Player identifier as issued by the auth collaborator. Ordering is used
/// for deterministic host promotion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    #[serde(rename = "type")]
    pub kind: String,
    pub ammo: i64,
}

/// Per-player state inside one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: Position,
    /// No floor or ceiling is enforced here; game rules own the range.
    pub health: i64,
    #[serde(default)]
    pub weapons: Vec<Weapon>,
    #[serde(default)]
    pub effects: Vec<String>,
    pub is_alive: bool,
    pub last_updated: DateTime<Utc>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            position: Position::default(),
            health: DEFAULT_HEALTH,
            weapons: Vec::new(),
            effects: Vec::new(),
            is_alive: true,
            last_updated: Utc::now(),
        }
    }
}

impl PlayerState {
    /// Subtract damage, saturating at the i64 bounds. Returns true if the
    /// player is dead afterwards; death is not undone by negative damage.
    pub fn apply_damage(&mut self, damage: i64) -> bool {
        self.health = self.health.saturating_sub(damage);
        self.last_updated = Utc::now();
        if self.health <= 0 {
            self.is_alive = false;
        }
        !self.is_alive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    Host,
    Player,
    Spectator,
}

/// Creation-time settings for a new session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub name: String,
    pub max_players: usize,
    pub is_private: bool,
    /// Argon2 PHC string; never the plaintext.
    pub password_hash: Option<String>,
}

/// Authoritative state of one game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub players: BTreeMap<PlayerId, PlayerState>,
    #[serde(default)]
    pub world_map: Vec<WorldObject>,
    #[serde(default)]
    pub shared_objects: Vec<WorldObject>,
    #[serde(default)]
    pub game_state: Map<String, Value>,
    pub player_roles: BTreeMap<PlayerId, PlayerRole>,
    pub max_players: usize,
    pub is_private: bool,
    #[serde(default)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Session {
    /// Create a session with `host` as its only member.
    pub fn new(id: SessionId, host: PlayerId, settings: SessionSettings) -> Self {
        let now = Utc::now();
        let mut players = BTreeMap::new();
        players.insert(host.clone(), PlayerState::default());
        let mut player_roles = BTreeMap::new();
        player_roles.insert(host, PlayerRole::Host);
        Self {
            id,
            name: settings.name,
            players,
            world_map: Vec::new(),
            shared_objects: Vec::new(),
            game_state: Map::new(),
            player_roles,
            max_players: settings.max_players,
            is_private: settings.is_private,
            password_hash: settings.password_hash,
            is_active: true,
            created_at: now,
            last_updated: now,
        }
    }

    /// Fresh session seeded from a save. The loading player becomes host and
    /// inherits the save creator's player state when one was captured.
    pub fn from_save(id: SessionId, save: &GameSave, host: PlayerId) -> Self {
        let state = save
            .players
            .get(&save.created_by)
            .cloned()
            .unwrap_or_default();
        let mut session = Self::new(
            id,
            host.clone(),
            SessionSettings {
                name: format!("{} (Loaded)", save.name),
                max_players: save.max_players,
                is_private: false,
                password_hash: None,
            },
        );
        session.players.insert(host, state);
        session.world_map = save.world_map.clone();
        session.shared_objects = save.shared_objects.clone();
        session.game_state = save.game_state.clone();
        session
    }

    pub fn is_member(&self, player: &PlayerId) -> bool {
        self.players.contains_key(player)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn role_of(&self, player: &PlayerId) -> Option<PlayerRole> {
        self.player_roles.get(player).copied()
    }

    pub fn host(&self) -> Option<&PlayerId> {
        self.player_roles
            .iter()
            .find(|(_, role)| **role == PlayerRole::Host)
            .map(|(id, _)| id)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn insert_player(&mut self, player: PlayerId, role: PlayerRole) {
        self.players.insert(player.clone(), PlayerState::default());
        self.player_roles.insert(player, role);
        self.touch();
    }

    pub fn remove_player(&mut self, player: &PlayerId) -> Option<(PlayerState, PlayerRole)> {
        let state = self.players.remove(player)?;
        let role = self.player_roles.remove(player).unwrap_or(PlayerRole::Player);
        self.touch();
        Some((state, role))
    }

    /// Hand the Host role to `player`, demoting whoever held it.
    pub fn set_host(&mut self, player: &PlayerId) {
        for (id, role) in self.player_roles.iter_mut() {
            if id == player {
                *role = PlayerRole::Host;
            } else if *role == PlayerRole::Host {
                *role = PlayerRole::Player;
            }
        }
        self.touch();
    }

    /// Promote a new host among members other than `excluding`: the
    /// lowest-id member matching `preferred` if any, else the lowest-id member.
    pub fn promote_host(
        &mut self,
        excluding: &PlayerId,
        preferred: impl Fn(&PlayerId) -> bool,
    ) -> Option<PlayerId> {
        let candidates = || self.players.keys().filter(|id| *id != excluding);
        let next = candidates()
            .find(|id| preferred(id))
            .or_else(|| candidates().next())
            .cloned()?;
        self.set_host(&next);
        Some(next)
    }

    /// Structural invariants: roles mirror players, one host while active
    /// and populated, never over capacity.
    pub fn invariants_hold(&self) -> bool {
        let keys_match = self.players.keys().eq(self.player_roles.keys());
        let hosts = self
            .player_roles
            .values()
            .filter(|r| **r == PlayerRole::Host)
            .count();
        let host_ok = if self.is_active && !self.players.is_empty() {
            hosts == 1
        } else {
            hosts <= 1
        };
        keys_match && host_ok && self.players.len() <= self.max_players
    }

    /// Client-facing view without credential material.
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            id: self.id,
            name: &self.name,
            players: &self.players,
            world_map: &self.world_map,
            shared_objects: &self.shared_objects,
            game_state: &self.game_state,
            player_roles: &self.player_roles,
            max_players: self.max_players,
            is_private: self.is_private,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView<'a> {
    pub id: SessionId,
    pub name: &'a str,
    pub players: &'a BTreeMap<PlayerId, PlayerState>,
    pub world_map: &'a [WorldObject],
    pub shared_objects: &'a [WorldObject],
    pub game_state: &'a Map<String, Value>,
    pub player_roles: &'a BTreeMap<PlayerId, PlayerRole>,
    pub max_players: usize,
    pub is_private: bool,
    pub is_active: bool,
}

/// Point-in-time copy of a session's mutable world, created on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSave {
    pub id: SaveId,
    pub session_id: SessionId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub players: BTreeMap<PlayerId, PlayerState>,
    pub world_map: Vec<WorldObject>,
    pub shared_objects: Vec<WorldObject>,
    pub game_state: Map<String, Value>,
    pub max_players: usize,
    pub created_by: PlayerId,
    pub created_at: DateTime<Utc>,
}

pub fn snapshot_as_save(
    session: &Session,
    name: impl Into<String>,
    description: Option<String>,
    created_by: PlayerId,
) -> GameSave {
    GameSave {
        id: SaveId::new(),
        session_id: session.id,
        name: name.into(),
        description,
        players: session.players.clone(),
        world_map: session.world_map.clone(),
        shared_objects: session.shared_objects.clone(),
        game_state: session.game_state.clone(),
        max_players: session.max_players,
        created_by,
        created_at: Utc::now(),
    }
}
