use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{PlayerId, PlayerRole, Position, Session};
use crate::sink::ConnectionId;

/// Result of checking a join password outside the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Missing,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetHit {
    pub player_id: PlayerId,
    pub damage: i64,
}

/// A game action as sent by the client. `raw` is relayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GameAction {
    pub action: String,
    pub target_hit: Option<TargetHit>,
    pub raw: Value,
}

impl GameAction {
    /// Extract the typed fields from a raw `game_action` payload.
    pub fn from_payload(raw: Value) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct Fields {
            action: String,
            #[serde(default)]
            target_hit: Option<TargetHit>,
        }

        let fields: Fields = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        Ok(Self {
            action: fields.action,
            target_hit: fields.target_hit,
            raw,
        })
    }
}

/// A request to mutate one session, applied by that session's actor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PositionUpdate { position: Position },
    GameAction(GameAction),
    Join { credentials: Credentials },
    Leave,
    HostMigrate { new_host: PlayerId },
    /// A live connection attached for an existing member.
    Connected { connection: ConnectionId },
    /// A live connection went away; membership is kept. Ignored when the
    /// player has since attached a newer connection.
    Disconnected { connection: ConnectionId },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositionUpdate { .. } => "position_update",
            Self::GameAction(_) => "game_action",
            Self::Join { .. } => "join",
            Self::Leave => "leave",
            Self::HostMigrate { .. } => "host_migrate",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PositionUpdate,
    GameAction,
    PlayerJoined,
    PlayerLeft,
    HostChanged,
    SessionClosed,
    PlayerConnected,
    PlayerDisconnected,
}

/// Outbound state change: `{type, player_id, payload}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub player_id: PlayerId,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, player_id: PlayerId, payload: Value) -> Self {
        Self {
            kind,
            player_id,
            payload,
        }
    }

    pub fn position_update(player: &PlayerId, position: Position) -> Self {
        Self::new(
            EventKind::PositionUpdate,
            player.clone(),
            json!({ "position": position }),
        )
    }

    pub fn game_action(player: &PlayerId, raw: Value) -> Self {
        Self::new(EventKind::GameAction, player.clone(), raw)
    }

    pub fn player_joined(player: &PlayerId, role: PlayerRole) -> Self {
        Self::new(EventKind::PlayerJoined, player.clone(), json!({ "role": role }))
    }

    pub fn player_left(player: &PlayerId) -> Self {
        Self::new(EventKind::PlayerLeft, player.clone(), json!({}))
    }

    pub fn host_changed(new_host: &PlayerId, previous: &PlayerId) -> Self {
        Self::new(
            EventKind::HostChanged,
            new_host.clone(),
            json!({ "previous_host": previous }),
        )
    }

    pub fn session_closed(last_player: &PlayerId) -> Self {
        Self::new(EventKind::SessionClosed, last_player.clone(), json!({}))
    }

    pub fn player_connected(player: &PlayerId) -> Self {
        Self::new(EventKind::PlayerConnected, player.clone(), json!({}))
    }

    pub fn player_disconnected(player: &PlayerId) -> Self {
        Self::new(EventKind::PlayerDisconnected, player.clone(), json!({}))
    }
}

/// An event plus the one connection (if any) that must not receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub event: Event,
    pub exclude: Option<PlayerId>,
}

impl Delivery {
    pub fn to_all(event: Event) -> Self {
        Self {
            event,
            exclude: None,
        }
    }

    pub fn to_others(event: Event, exclude: &PlayerId) -> Self {
        Self {
            event,
            exclude: Some(exclude.clone()),
        }
    }
}

/// Direct answer to the acting player.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Full session state for a freshly attached connection.
    Welcome(Box<Session>),
    Left,
}

/// What applying one command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub deliveries: Vec<Delivery>,
    pub reply: Option<Reply>,
    /// State changed and should reach the persistence collaborator.
    pub mutated: bool,
    /// Membership or role changed; saved without waiting for the next flush.
    pub structural: bool,
    /// Connection to activate in the sink before this outcome fans out.
    pub activate: Option<ConnectionId>,
}
