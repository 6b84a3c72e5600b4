//! REST control plane
//!
//! Rooms are created, inspected, and administered over HTTP; the WebSocket
//! admission route shares the same router and state. Failures use the
//! `{"code": int, "error": string}` envelope throughout. Host-only routes
//! take the host token in the `Authorization` header and verify it against
//! the target room.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::config::Config;
use crate::error::Error;
use crate::metrics::{track_http, ServerMetrics};
use crate::server::admission;
use crate::server::hub::{parse_room_id, Hub};
use crate::server::room::{
    MetricsNotifier, Room, RoomId, RoomOptions, MAX_ROOM_ID, MIN_ROOM_ID,
};
use crate::transport::task_pool::TaskPool;

/// How many random ids to try before giving up on room creation
const CREATE_ROOM_MAX_ATTEMPTS: usize = 100;

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub pool: Arc<TaskPool>,
    pub metrics: Arc<ServerMetrics>,
    pub config: Arc<Config>,
    /// Absent when no Prometheus recorder is installed (tests, tools)
    pub prometheus: Option<PrometheusHandle>,
}

/// JSON error envelope used by every route
#[derive(Debug)]
pub struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn new<T: Into<String>>(code: StatusCode, message: T) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let code =
            StatusCode::from_u16(err.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(code, err.message().to_owned())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code.as_u16(),
            "error": self.message,
        });
        (self.code, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
    pub host_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room_id: RoomId,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub client_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidatePasswordRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct KickUserRequest {
    pub username: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub new_password: String,
}

/// Assemble the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:room_id", get(admission::websocket_handler))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:room_id", get(room_info).delete(delete_room))
        .route(
            "/api/rooms/:room_id/validate-password",
            post(validate_password),
        )
        .route("/api/rooms/:room_id/kick", post(kick_user))
        .route("/api/rooms/:room_id/password", put(change_password))
        .route("/api/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn(track_http))
        .with_state(state)
}

/// `POST /api/rooms` - create a room with a random id and mint its host
/// token
async fn create_room(
    State(state): State<AppState>,
    body: Option<Json<CreateRoomRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(body)| body).unwrap_or_default();

    let hashed = match request.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => Some(
            auth::hash_password(password)
                .map_err(|_| ApiError::internal("failed to process password"))?,
        ),
        None => None,
    };

    for _ in 0..CREATE_ROOM_MAX_ATTEMPTS {
        let room_id: RoomId = rand::thread_rng().gen_range(MIN_ROOM_ID..=MAX_ROOM_ID);
        let host_id = Uuid::new_v4().to_string();

        let mut options = RoomOptions::new().with_host(host_id.clone());
        if let Some(hashed) = hashed.clone() {
            options = options.with_password(hashed);
        }

        let metrics = Some(state.metrics.clone() as Arc<dyn MetricsNotifier>);
        if state.hub.create_room(room_id, metrics, options).await.is_some() {
            let host_token = auth::issue_host_token(&state.config.secret_key, room_id, &host_id)
                .map_err(|_| ApiError::internal("failed to generate host token"))?;
            info!(room_id, has_password = hashed.is_some(), "room created");
            return Ok((
                StatusCode::CREATED,
                Json(CreateRoomResponse {
                    room_id,
                    host_token,
                }),
            ));
        }
    }

    warn!(attempts = CREATE_ROOM_MAX_ATTEMPTS, "room id space exhausted");
    Err(ApiError::internal(
        "failed to create room after multiple attempts",
    ))
}

/// `GET /api/rooms/:room_id`
async fn room_info(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, ApiError> {
    let room = lookup_room(&state, &room_id).await?;
    Ok(Json(RoomResponse {
        room_id: room.id(),
        has_password: room.has_password().await,
        host_id: room.host_id().map(str::to_owned),
        client_count: room.client_count().await,
    }))
}

/// `POST /api/rooms/:room_id/validate-password`
async fn validate_password(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    body: Option<Json<ValidatePasswordRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = lookup_room(&state, &room_id).await?;
    let request = body.map(|Json(body)| body).unwrap_or_default();

    let valid = match room.hashed_password().await {
        None => true,
        Some(hashed) => auth::verify_password(&request.password, &hashed),
    };
    info!(room_id = room.id(), valid, "password validation attempt");
    Ok(Json(json!({ "valid": valid })))
}

/// `POST /api/rooms/:room_id/kick` - host only
async fn kick_user(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<KickUserRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = lookup_room(&state, &room_id).await?;
    require_host(&state, &headers, &room)?;

    let Some(Json(request)) = body else {
        return Err(ApiError::bad_request("username is required"));
    };

    if !room.kick_by_username(&request.username).await {
        return Err(ApiError::not_found("user not found in room"));
    }

    info!(room_id = room.id(), username = %request.username, "user kicked via API");
    Ok(Json(json!({ "message": "user kicked successfully" })))
}

/// `PUT /api/rooms/:room_id/password` - host only; empty password clears the
/// gate
async fn change_password(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<ChangePasswordRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = lookup_room(&state, &room_id).await?;
    require_host(&state, &headers, &room)?;

    let request = body.map(|Json(body)| body).unwrap_or_default();
    let hashed = if request.new_password.is_empty() {
        None
    } else {
        Some(
            auth::hash_password(&request.new_password)
                .map_err(|_| ApiError::internal("failed to hash password"))?,
        )
    };

    let has_password = hashed.is_some();
    room.set_password(hashed).await;
    info!(room_id = room.id(), has_password, "room password changed");
    Ok(Json(json!({ "message": "password changed successfully" })))
}

/// `DELETE /api/rooms/:room_id` - host only. Removes the registry entry;
/// the actor is stopped separately at shutdown.
async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = lookup_room(&state, &room_id).await?;
    require_host(&state, &headers, &room)?;

    if !state.hub.delete_room(room.id()).await {
        return Err(ApiError::not_found("room not found"));
    }

    info!(room_id = room.id(), "room deleted");
    Ok(Json(json!({ "message": "room deleted successfully" })))
}

/// `GET /api/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics` - Prometheus exposition
async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => ApiError::internal("metrics recorder not installed").into_response(),
    }
}

async fn lookup_room(state: &AppState, raw_id: &str) -> Result<Arc<Room>, ApiError> {
    let room_id = parse_room_id(raw_id)?;
    state
        .hub
        .get_room(room_id)
        .await
        .ok_or_else(|| ApiError::not_found("room not found"))
}

fn require_host(state: &AppState, headers: &HeaderMap, room: &Arc<Room>) -> Result<(), ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if token.is_empty() {
        return Err(ApiError::unauthorized("host token required"));
    }
    auth::verify_host_token(token, &state.config.secret_key, room.id(), room.host_id())
        .map_err(|e| ApiError::unauthorized(e.message().to_owned()))?;
    Ok(())
}
