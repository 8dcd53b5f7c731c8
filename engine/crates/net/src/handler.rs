use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lifecycle::LifecycleError;
use session::{Command, CommandError, GameAction, PlayerId, SessionHandle, SessionId};

use crate::api::error_code;
use crate::protocol::{ClientMessage, CloseCode, ProtocolError, ServerMessage};
use crate::rate_limiter::MessageThrottle;
use crate::registry::Registration;
use crate::web_server::AppState;

type WsWriter = SplitSink<WebSocket, Message>;
type WsReader = SplitStream<WebSocket>;

/// Why a joined connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientClosed,
    TransportError,
    /// The registry dropped this connection.
    Kicked(CloseCode),
    Left,
    ActorGone,
    Shutdown,
}

impl Exit {
    fn close_code(self) -> Option<CloseCode> {
        match self {
            Exit::ClientClosed => None,
            Exit::TransportError => Some(CloseCode::ProtocolViolation),
            Exit::Kicked(code) => Some(code),
            Exit::Left => Some(CloseCode::Normal),
            Exit::ActorGone => Some(CloseCode::ServerError),
            Exit::Shutdown => Some(CloseCode::GoingAway),
        }
    }

    /// Whether events already queued for this connection should still be
    /// written before the close frame.
    fn flushes_outbound(self) -> bool {
        matches!(self, Exit::Left | Exit::Kicked(CloseCode::Normal))
    }

    /// Whether the session should hear that this player dropped.
    fn announces_disconnect(self) -> bool {
        match self {
            Exit::Kicked(CloseCode::Overflow) => true,
            Exit::Kicked(_) | Exit::Left | Exit::Shutdown => false,
            Exit::ClientClosed | Exit::TransportError | Exit::ActorGone => true,
        }
    }
}

/// Close code for a connection refused before it joined.
pub fn refusal_code(e: &LifecycleError) -> CloseCode {
    match e {
        LifecycleError::Auth(_) => CloseCode::AuthFailed,
        LifecycleError::SessionNotFound(_)
        | LifecycleError::NotInSession { .. }
        | LifecycleError::NoCurrentSession(_)
        | LifecycleError::Command(CommandError::SessionInactive)
        | LifecycleError::Command(CommandError::NotMember(_)) => CloseCode::SessionUnavailable,
        _ => CloseCode::ServerError,
    }
}

async fn close(writer: &mut WsWriter, code: CloseCode) {
    let frame = CloseFrame {
        code: code.code(),
        reason: Utf8Bytes::from_static(code.reason()),
    };
    let _ = writer.send(Message::Close(Some(frame))).await;
}

async fn send_text(writer: &mut WsWriter, text: String) -> Result<(), axum::Error> {
    writer.send(Message::Text(text.into())).await
}

/// Write whatever the registry queued before the slot was dropped.
async fn flush_outbound(writer: &mut WsWriter, registration: &mut Registration) {
    while let Ok(text) = registration.outbound.try_recv() {
        if send_text(writer, text).await.is_err() {
            break;
        }
    }
}

async fn send_error(writer: &mut WsWriter, code: &str, message: String) -> Result<(), axum::Error> {
    send_text(writer, ServerMessage::Error { code, message }.to_json()).await
}

/// Drive one WebSocket from Connecting through Joined to Closed.
pub async fn handle_connection(
    socket: WebSocket,
    raw_session_id: String,
    token: Option<String>,
    state: AppState,
) {
    let (mut writer, reader) = socket.split();

    // Connecting
    let Ok(session_id) = raw_session_id.parse::<SessionId>() else {
        tracing::debug!(session_id = %raw_session_id, "Connection refused: malformed session id");
        close(&mut writer, CloseCode::SessionUnavailable).await;
        return;
    };
    let token = token.unwrap_or_default();
    let admission = match state.controller.admit(session_id, &token).await {
        Ok(a) => a,
        Err(e) => {
            tracing::info!(%session_id, "Connection refused: {}", e);
            close(&mut writer, refusal_code(&e)).await;
            return;
        }
    };

    // Authenticated -> Joined
    let player = admission.player.clone();
    let mut registration = state.registry.register(session_id, &player);
    let welcome = match state.controller.attached(&admission, registration.id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(%session_id, %player, "Attach failed: {}", e);
            state.registry.deregister(session_id, &player, registration.id);
            close(&mut writer, refusal_code(&e)).await;
            return;
        }
    };
    tracing::info!(%session_id, %player, connection = %registration.id, "Player connected");

    let welcome = ServerMessage::Welcome {
        session_id,
        player_id: &player,
        snapshot: welcome.view(),
    }
    .to_json();

    let exit = if send_text(&mut writer, welcome).await.is_err() {
        Exit::TransportError
    } else {
        let mut joined = Joined {
            session_id,
            player: player.clone(),
            handle: admission.handle.clone(),
            throttle: MessageThrottle::new(state.limits.max_messages_per_second),
            state: &state,
        };
        joined.run(&mut writer, reader, &mut registration).await
    };

    // Closed
    let removed = state.registry.deregister(session_id, &player, registration.id);
    if exit.flushes_outbound() {
        flush_outbound(&mut writer, &mut registration).await;
    }
    if let Some(code) = exit.close_code() {
        close(&mut writer, code).await;
    }
    if exit.announces_disconnect() && (removed || exit == Exit::Kicked(CloseCode::Overflow)) {
        state.controller.detached(&admission, registration.id).await;
    }
    tracing::info!(%session_id, %player, ?exit, "Player connection closed");
}

struct Joined<'a> {
    session_id: SessionId,
    player: PlayerId,
    handle: SessionHandle,
    throttle: MessageThrottle,
    state: &'a AppState,
}

enum Step {
    Continue,
    Exit(Exit),
}

impl Joined<'_> {
    async fn run(
        &mut self,
        writer: &mut WsWriter,
        mut reader: WsReader,
        registration: &mut Registration,
    ) -> Exit {
        let mut shutdown = self.state.shutdown.clone();
        if *shutdown.borrow() {
            return Exit::Shutdown;
        }

        loop {
            tokio::select! {
                frame = reader.next() => {
                    let step = match frame {
                        Some(Ok(Message::Text(text))) => self.on_text(writer, text.as_str()).await,
                        Some(Ok(Message::Binary(bytes))) => {
                            let err = if bytes.len() > self.state.limits.max_message_bytes {
                                ProtocolError::TooLarge { size: bytes.len(), max: self.state.limits.max_message_bytes }
                            } else {
                                ProtocolError::BinaryFrame
                            };
                            self.reject(writer, &err).await
                        }
                        Some(Ok(Message::Close(_))) | None => Step::Exit(Exit::ClientClosed),
                        Some(Ok(_)) => Step::Continue,
                        Some(Err(e)) => {
                            tracing::debug!(session_id = %self.session_id, player = %self.player, "WebSocket read error: {}", e);
                            Step::Exit(Exit::TransportError)
                        }
                    };
                    if let Step::Exit(exit) = step {
                        return exit;
                    }
                }
                Some(text) = registration.outbound.recv() => {
                    if send_text(writer, text).await.is_err() {
                        return Exit::TransportError;
                    }
                }
                code = &mut registration.closed => {
                    return match code {
                        Ok(code) => Exit::Kicked(code),
                        Err(_) => Exit::ActorGone,
                    };
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Exit::Shutdown;
                    }
                }
            }
        }
    }

    async fn reject(&self, writer: &mut WsWriter, err: &ProtocolError) -> Step {
        tracing::debug!(session_id = %self.session_id, player = %self.player, "Message rejected: {}", err);
        match send_error(writer, err.code(), err.to_string()).await {
            Ok(()) => Step::Continue,
            Err(_) => Step::Exit(Exit::TransportError),
        }
    }

    async fn on_text(&mut self, writer: &mut WsWriter, text: &str) -> Step {
        let max = self.state.limits.max_message_bytes;
        if text.len() > max {
            return self
                .reject(writer, &ProtocolError::TooLarge { size: text.len(), max })
                .await;
        }
        if !self.throttle.try_consume() {
            return self.reject(writer, &ProtocolError::RateLimited).await;
        }
        let message = match ClientMessage::decode(text) {
            Ok(m) => m,
            Err(e) => return self.reject(writer, &e).await,
        };

        let command = match message {
            ClientMessage::Ping => {
                return match send_text(writer, ServerMessage::Pong.to_json()).await {
                    Ok(()) => Step::Continue,
                    Err(_) => Step::Exit(Exit::TransportError),
                };
            }
            ClientMessage::Leave => return self.leave(writer).await,
            ClientMessage::PositionUpdate { position } => Command::PositionUpdate { position },
            ClientMessage::HostMigrate { player_id } => return self.migrate_host(writer, player_id).await,
            ClientMessage::GameAction(raw) => match GameAction::from_payload(raw) {
                Ok(action) => Command::GameAction(action),
                Err(reason) => {
                    let err = ProtocolError::InvalidPayload {
                        kind: "game_action",
                        reason,
                    };
                    return self.reject(writer, &err).await;
                }
            },
        };

        match self.handle.apply(&self.player, command).await {
            Ok(_) => Step::Continue,
            Err(CommandError::ActorUnavailable) => {
                tracing::warn!(session_id = %self.session_id, player = %self.player, "Session actor unavailable");
                Step::Exit(Exit::ActorGone)
            }
            Err(e) => match send_error(writer, e.code(), e.to_string()).await {
                Ok(()) => Step::Continue,
                Err(_) => Step::Exit(Exit::TransportError),
            },
        }
    }

    async fn migrate_host(&self, writer: &mut WsWriter, new_host: PlayerId) -> Step {
        let migrated = self
            .state
            .controller
            .migrate_host(&self.player, self.session_id, new_host)
            .await;
        match migrated {
            Ok(()) => Step::Continue,
            Err(LifecycleError::Command(CommandError::ActorUnavailable)) => {
                tracing::warn!(session_id = %self.session_id, player = %self.player, "Session actor unavailable");
                Step::Exit(Exit::ActorGone)
            }
            Err(e) => match send_error(writer, error_code(&e), e.to_string()).await {
                Ok(()) => Step::Continue,
                Err(_) => Step::Exit(Exit::TransportError),
            },
        }
    }

    async fn leave(&self, writer: &mut WsWriter) -> Step {
        match self.state.controller.leave(&self.player, self.session_id).await {
            Ok(()) => Step::Exit(Exit::Left),
            Err(e) => {
                let sent = send_error(writer, error_code(&e), e.to_string()).await;
                if sent.is_err() {
                    Step::Exit(Exit::TransportError)
                } else {
                    Step::Continue
                }
            }
        }
    }
}
