use serde::{Deserialize, Serialize};
use serde_json::Value;
use session::{PlayerId, Position, SessionId, SessionView};
use thiserror::Error;

/// Client-to-server message, decoded from `{"type": .., "payload": {..}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    PositionUpdate { position: Position },
    /// Raw payload; relayed verbatim once validated.
    GameAction(Value),
    HostMigrate { player_id: PlayerId },
    Leave,
    Ping,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct PositionPayload {
    position: Position,
}

#[derive(Deserialize)]
struct HostMigratePayload {
    player_id: PlayerId,
}

/// Per-message rejection. The connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    #[error("binary frames are not supported")]
    BinaryFrame,

    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge { size: usize, max: usize },

    #[error("too many messages, slow down")]
    RateLimited,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_message",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload { .. } => "validation_error",
            Self::BinaryFrame => "unsupported_frame",
            Self::TooLarge { .. } => "message_too_large",
            Self::RateLimited => "rate_limited",
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(kind: &'static str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match envelope.kind.as_str() {
            "position_update" => {
                let p: PositionPayload = payload("position_update", envelope.payload)?;
                Ok(Self::PositionUpdate { position: p.position })
            }
            "game_action" => {
                if !envelope.payload.is_object() {
                    return Err(ProtocolError::InvalidPayload {
                        kind: "game_action",
                        reason: "payload must be an object".into(),
                    });
                }
                Ok(Self::GameAction(envelope.payload))
            }
            "host_migrate" => {
                let p: HostMigratePayload = payload("host_migrate", envelope.payload)?;
                Ok(Self::HostMigrate { player_id: p.player_id })
            }
            "leave" => Ok(Self::Leave),
            "ping" => Ok(Self::Ping),
            _ => Err(ProtocolError::UnknownType(envelope.kind)),
        }
    }
}

/// Direct server-to-client replies. Session events are serialized from
/// `session::Event` and share the `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Welcome {
        session_id: SessionId,
        player_id: &'a PlayerId,
        snapshot: SessionView<'a>,
    },
    Error {
        code: &'a str,
        message: String,
    },
    Pong,
}

impl ServerMessage<'_> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize server message: {}", e);
            r#"{"type":"error","code":"internal_error","message":"serialization failed"}"#.to_string()
        })
    }
}

/// WebSocket close codes used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Graceful leave.
    Normal,
    /// Server is shutting down.
    GoingAway,
    ServerError,
    AuthFailed,
    /// Session not found, inactive, or the player is not a member.
    SessionUnavailable,
    ProtocolViolation,
    /// A newer connection for the same player took over.
    Replaced,
    /// Outbound buffer overflowed (slow consumer).
    Overflow,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ServerError => 4000,
            Self::AuthFailed => 4001,
            Self::SessionUnavailable => 4002,
            Self::ProtocolViolation => 4003,
            Self::Replaced => 4004,
            Self::Overflow => 4008,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "left session",
            Self::GoingAway => "server shutting down",
            Self::ServerError => "server error",
            Self::AuthFailed => "authentication failed",
            Self::SessionUnavailable => "session unavailable",
            Self::ProtocolViolation => "protocol violation",
            Self::Replaced => "replaced by newer connection",
            Self::Overflow => "outbound buffer overflow",
        }
    }
}
