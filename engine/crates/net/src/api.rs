use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use lifecycle::{AuthError, CreateSession, LifecycleError, SessionSummary};
use persistence::PersistenceError;
use serde::{Deserialize, Serialize};
use session::{CommandError, GameSave, PlayerId, SaveId, SessionId};

use crate::web_server::AppState;

/// Stable error code for a lifecycle failure, shared by HTTP bodies and
/// WebSocket `error` replies.
pub fn error_code(e: &LifecycleError) -> &'static str {
    match e {
        LifecycleError::Auth(_) => "unauthorized",
        LifecycleError::Command(c) => c.code(),
        LifecycleError::Persistence(PersistenceError::SaveNotFound(_)) => "save_not_found",
        LifecycleError::Persistence(_) => "internal_error",
        LifecycleError::SessionNotFound(_) => "session_not_found",
        LifecycleError::NoCurrentSession(_) | LifecycleError::NotInSession { .. } => "not_in_session",
        LifecycleError::AlreadyInSession { .. } => "already_in_session",
        LifecycleError::InvalidSettings(_) => "validation_error",
        LifecycleError::PasswordHash(_) | LifecycleError::Task(_) => "internal_error",
    }
}

pub fn http_status(e: &LifecycleError) -> StatusCode {
    match e {
        LifecycleError::Auth(_) => StatusCode::UNAUTHORIZED,
        LifecycleError::Command(c) => match c {
            CommandError::Validation(_) => StatusCode::BAD_REQUEST,
            CommandError::InvalidCredentials | CommandError::NotHost | CommandError::NotMember(_) => {
                StatusCode::FORBIDDEN
            }
            CommandError::SessionFull
            | CommandError::AlreadyMember(_)
            | CommandError::SessionInactive
            | CommandError::PlayerDead(_) => StatusCode::CONFLICT,
            CommandError::ActorUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        },
        LifecycleError::Persistence(PersistenceError::SaveNotFound(_))
        | LifecycleError::Persistence(PersistenceError::SessionNotFound(_))
        | LifecycleError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::NotInSession { .. } => StatusCode::FORBIDDEN,
        LifecycleError::NoCurrentSession(_) | LifecycleError::AlreadyInSession { .. } => {
            StatusCode::CONFLICT
        }
        LifecycleError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Persistence(_) | LifecycleError::PasswordHash(_) | LifecycleError::Task(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        Self(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self(e.into())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = http_status(&self.0);
        if status.is_server_error() {
            tracing::error!("API request failed: {}", self.0);
        }
        let body = ErrorBody {
            code: error_code(&self.0),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

fn caller(state: &AppState, headers: &HeaderMap) -> Result<PlayerId, AuthError> {
    state.controller.authenticate(bearer(headers)?)
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub name: String,
    #[serde(default)]
    pub max_players: Option<usize>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinBody {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSaveBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Save listing entry; the full snapshot stays server-side.
#[derive(Debug, Serialize)]
pub struct SaveSummary {
    pub id: SaveId,
    pub session_id: SessionId,
    pub name: String,
    pub description: Option<String>,
    pub players: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&GameSave> for SaveSummary {
    fn from(save: &GameSave) -> Self {
        Self {
            id: save.id,
            session_id: save.session_id,
            name: save.name.clone(),
            description: save.description.clone(),
            players: save.players.len(),
            created_at: save.created_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}/join", post(join_session))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/saves", post(create_save).get(list_saves))
        .route("/saves/{id}/load", post(load_save))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let player = caller(&state, &headers)?;
    let summary = state
        .controller
        .create_session(
            &player,
            CreateSession {
                name: body.name,
                max_players: body.max_players,
                is_private: body.is_private,
                password: body.password,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    caller(&state, &headers)?;
    Ok(Json(state.controller.list_sessions().await))
}

async fn join_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<SessionId>,
    Json(body): Json<JoinBody>,
) -> ApiResult<Json<SessionSummary>> {
    let player = caller(&state, &headers)?;
    let summary = state.controller.join(&player, id, body.password).await?;
    Ok(Json(summary))
}

async fn leave_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    let player = caller(&state, &headers)?;
    state.controller.leave(&player, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSaveBody>,
) -> ApiResult<(StatusCode, Json<SaveSummary>)> {
    let player = caller(&state, &headers)?;
    let save = state
        .controller
        .create_save(&player, body.name, body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(SaveSummary::from(&save))))
}

async fn list_saves(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<SaveSummary>>> {
    let player = caller(&state, &headers)?;
    let saves = state.controller.list_saves(&player).await?;
    Ok(Json(saves.iter().map(SaveSummary::from).collect()))
}

async fn load_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<SaveId>,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let player = caller(&state, &headers)?;
    let summary = state.controller.load_save(&player, id).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}
