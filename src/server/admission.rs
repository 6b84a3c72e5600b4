//! WebSocket admission pipeline
//!
//! Turns an HTTP request into a registered room member. All validation -
//! room id, username, password, host token - completes before the upgrade,
//! so a rejected request never touches room state. After the upgrade the
//! client is registered and its writer and reader loops are submitted to the
//! task pool; a pool rejection writes a best-effort error frame and
//! withdraws the registration.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth;
use crate::protocol::messages::{validate_username, DEFAULT_USERNAME};
use crate::server::api::{ApiError, AppState};
use crate::server::client::{self, Client};
use crate::server::hub::parse_room_id;
use crate::server::room::Room;
use crate::transport::connection::{split_socket, FrameSink, Outbound, MAX_MESSAGE_SIZE};
use crate::transport::task_pool::TaskPool;

const WRITE_TASK_FAILED: &[u8] = br#"{"error":"write task failed"}"#;
const READ_TASK_FAILED: &[u8] = br#"{"error":"read task failed"}"#;

/// Query parameters accepted on the admission URL
#[derive(Debug, Deserialize)]
pub struct AdmissionQuery {
    pub username: Option<String>,
    pub password: Option<String>,
    pub host_token: Option<String>,
}

/// `GET /ws/:room_id` - validate, upgrade, and hand the connection to the
/// room
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<AdmissionQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let room_id = match parse_room_id(&room_id) {
        Ok(id) => id,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let Some(room) = state.hub.get_room(room_id).await else {
        return ApiError::not_found("room not found").into_response();
    };

    let username = query.username.as_deref().map(str::trim).unwrap_or("");
    let username = if username.is_empty() {
        DEFAULT_USERNAME.to_owned()
    } else {
        if let Err(e) = validate_username(username) {
            return ApiError::from(e).into_response();
        }
        username.to_owned()
    };

    if let Some(hashed) = room.hashed_password().await {
        let authorized = query
            .password
            .as_deref()
            .map(|password| auth::verify_password(password, &hashed))
            .unwrap_or(false);
        if !authorized {
            return ApiError::unauthorized("invalid room password").into_response();
        }
    }

    // A present but invalid token is a hard rejection; absence just means
    // the participant is not a host.
    let is_host = match query.host_token.as_deref() {
        Some(token) => {
            if let Err(e) =
                auth::verify_host_token(token, &state.config.secret_key, room_id, room.host_id())
            {
                warn!(room_id, error = %e, "host token rejected");
                return ApiError::unauthorized("invalid host token").into_response();
            }
            true
        }
        None => false,
    };

    let pool = state.pool.clone();
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| admit(socket, room, username, is_host, pool))
}

/// Post-upgrade half of admission: construct the client, register it, and
/// start its IO loops on the pool.
async fn admit(
    socket: WebSocket,
    room: Arc<Room>,
    username: String,
    is_host: bool,
    pool: Arc<TaskPool>,
) {
    let (source, mut sink) = split_socket(socket);
    let (client, outbound_rx) = Client::new(username, is_host, &room);

    if room.register(client.clone()).await.is_err() {
        // The room stopped between lookup and registration.
        client.close();
        sink.send_close().await;
        return;
    }

    info!(
        room_id = room.id(),
        username = client.username(),
        is_host,
        "client admitted"
    );

    let writer_slot = match pool.try_reserve() {
        Ok(slot) => slot,
        Err(e) => {
            warn!(room_id = room.id(), error = %e, "rejecting connection, no writer slot");
            let _ = sink.send_data(Bytes::from_static(WRITE_TASK_FAILED)).await;
            sink.send_close().await;
            room.unregister(client).await;
            return;
        }
    };
    writer_slot.spawn(client::write_loop(client.clone(), outbound_rx, sink));

    match pool.try_reserve() {
        Ok(slot) => slot.spawn(client::read_loop(client.clone(), source)),
        Err(e) => {
            warn!(room_id = room.id(), error = %e, "rejecting connection, no reader slot");
            // Best effort through the writer, which is already running.
            let _ = client.try_enqueue(Outbound::Data(Bytes::from_static(READ_TASK_FAILED)));
            room.unregister(client).await;
        }
    }
}
