//! Plain HTTP surface: room creation and existence checks, card bytes, and
//! directory stats.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::ServerMsg;
use crate::room::directory::RoomStats;
use crate::types::WinCondition;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
struct CreateRoomRequest {
    win_condition: Option<WinCondition>,
    creator_name: Option<String>,
    password: Option<String>,
}

/// `POST /create` — an empty body creates a cards-finish room with defaults.
pub async fn create_room(State(state): State<Arc<AppState>>, body: Bytes) -> String {
    let request: CreateRoomRequest = if body.iter().all(|b| b.is_ascii_whitespace()) {
        CreateRoomRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("bad create-room payload: {}", err);
                return error_json("Failed to create room");
            }
        }
    };

    match state
        .rooms
        .create(
            request.win_condition,
            request.creator_name,
            request.password,
        )
        .await
    {
        Ok(room_state) => {
            serde_json::to_string(&room_state).unwrap_or_else(|_| error_json("Failed to create room"))
        }
        Err(reason) => {
            tracing::warn!("failed to create room: {}", reason);
            error_json(&reason)
        }
    }
}

fn error_json(reason: &str) -> String {
    serde_json::to_string(&ServerMsg::ErrorMsg {
        reason: reason.to_string(),
    })
    .unwrap_or_else(|_| "{}".to_string())
}

/// `POST /exists` — body is a JSON string holding the room code.
pub async fn room_exists(State(state): State<Arc<AppState>>, Json(room_id): Json<String>) -> Json<bool> {
    Json(state.rooms.exists(&room_id.trim().to_lowercase()))
}

/// `GET /cards/:card_id` — cached artifact bytes, long-lived immutable.
pub async fn card_bytes(
    Path(card_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some((path, mime)) = state.cards.get(&card_id) else {
        return (StatusCode::NOT_FOUND, "Card not found").into_response();
    };
    let path = path.to_path_buf();

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, mime),
                (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::warn!("failed to read cached card {}: {}", path.display(), err);
            (StatusCode::NOT_FOUND, "Card image unavailable").into_response()
        }
    }
}

/// `GET /stats` — per-room member counts and idle ages.
pub async fn directory_stats(State(state): State<Arc<AppState>>) -> Json<HashMap<String, RoomStats>> {
    Json(state.rooms.stats().await)
}
