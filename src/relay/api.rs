use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use super::error::ApiError;
use super::{RelayState, RoomInfo, VERSION};

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub async fn health(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let (rooms_active, participants_active) = state.counts();

    Json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "rooms_active": rooms_active,
        "participants_active": participants_active,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "tls_enabled": state.config.tls_enabled,
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/rooms
// ---------------------------------------------------------------------------

pub async fn list_rooms(State(state): State<Arc<RelayState>>) -> Json<Vec<RoomInfo>> {
    Json(state.list_rooms())
}

// ---------------------------------------------------------------------------
// GET /v1/rooms/:room_id
// ---------------------------------------------------------------------------

pub async fn get_room(
    State(state): State<Arc<RelayState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomInfo>, ApiError> {
    state
        .room_info(&room_id)
        .map(Json)
        .ok_or(ApiError::RoomNotFound(room_id))
}
