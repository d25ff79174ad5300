//! Signaling relay.
//!
//! Rooms live in memory only.  Each member connection is driven by
//! [`serve_member`], which speaks the `protocol` message set over a pair of
//! channels; the WebSocket handler in [`ws`] is one adapter onto it.  The
//! relay never looks inside `signal` payloads.

pub mod api;
pub mod error;
pub mod events;
pub mod sse;
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::protocol::{ClientMessage, ParticipantId, ParticipantInfo, ServerMessage};
use events::{EventBus, RelayEvent};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const REASON_BAD_PASSWORD: &str = "invalid room password";
pub const REASON_ROOM_FULL: &str = "room is full";
pub const REASON_TOO_MANY_ROOMS: &str = "too many rooms";

// ─── Rooms ──────────────────────────────────────────────────────────────────

struct Member {
    id: ParticipantId,
    display_name: String,
    screen_sharing: bool,
    joined_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

struct RelayRoom {
    id: String,
    password_hash: Option<String>,
    created_at: DateTime<Utc>,
    members: Vec<Member>,
}

impl RelayRoom {
    fn broadcast_except(&self, except: &ParticipantId, msg: &ServerMessage) {
        for member in self.members.iter().filter(|m| &m.id != except) {
            let _ = member.tx.send(msg.clone());
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            password_protected: self.password_hash.is_some(),
            created_at: self.created_at,
            participants: self
                .members
                .iter()
                .map(|m| MemberInfo {
                    id: m.id.to_string(),
                    display_name: m.display_name.clone(),
                    screen_sharing: m.screen_sharing,
                    joined_at: m.joined_at,
                })
                .collect(),
        }
    }
}

/// REST view of a room.  Never includes the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub id: String,
    pub password_protected: bool,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<MemberInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub id: String,
    pub display_name: String,
    pub screen_sharing: bool,
    pub joined_at: DateTime<Utc>,
}

fn password_hash(room_id: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{room_id}:{password}").as_bytes());
    hex::encode(hasher.finalize())
}

// ─── RelayState ─────────────────────────────────────────────────────────────

pub struct RelayState {
    pub config: RelayConfig,
    pub events: EventBus,
    pub started_at: Instant,
    rooms: RwLock<HashMap<String, RelayRoom>>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            events: EventBus::new(),
            started_at: Instant::now(),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    fn rooms(&self) -> RwLockReadGuard<'_, HashMap<String, RelayRoom>> {
        self.rooms.read().unwrap_or_else(|e| e.into_inner())
    }

    fn rooms_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, RelayRoom>> {
        self.rooms.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a member.  Returns its id and the room roster (joiner included,
    /// join order), or the rejection reason.
    ///
    /// `joinAccepted` is queued on `tx` before the room lock is released, so
    /// every later room frame reaches the joiner after its snapshot.
    pub fn join(
        &self,
        room_id: &str,
        display_name: &str,
        password: Option<&str>,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<(ParticipantId, Vec<ParticipantInfo>), &'static str> {
        let password = password.filter(|p| !p.is_empty());
        let mut rooms = self.rooms_mut();

        if let Some(room) = rooms.get(room_id) {
            if let Some(stored) = &room.password_hash {
                let supplied = password_hash(room_id, password.unwrap_or(""));
                if !bool::from(supplied.as_bytes().ct_eq(stored.as_bytes())) {
                    return Err(REASON_BAD_PASSWORD);
                }
            }
            if room.members.len() >= self.config.max_participants_per_room {
                return Err(REASON_ROOM_FULL);
            }
        } else {
            if rooms.len() >= self.config.max_rooms {
                return Err(REASON_TOO_MANY_ROOMS);
            }
            let room = RelayRoom {
                id: room_id.to_string(),
                password_hash: password.map(|p| password_hash(room_id, p)),
                created_at: Utc::now(),
                members: Vec::new(),
            };
            info!(room_id, password_protected = room.password_hash.is_some(), "room opened");
            self.events
                .emit(RelayEvent::room_opened(room_id, room.password_hash.is_some()));
            rooms.insert(room_id.to_string(), room);
        }

        let Some(room) = rooms.get_mut(room_id) else {
            return Err(REASON_TOO_MANY_ROOMS);
        };

        let id = ParticipantId::generate();
        room.broadcast_except(
            &id,
            &ServerMessage::ParticipantJoined {
                id: id.clone(),
                display_name: display_name.to_string(),
            },
        );
        let participants: Vec<ParticipantInfo> = room
            .members
            .iter()
            .map(|m| ParticipantInfo {
                id: m.id.clone(),
                display_name: m.display_name.clone(),
                screen_sharing: m.screen_sharing,
            })
            .chain(std::iter::once(ParticipantInfo {
                id: id.clone(),
                display_name: display_name.to_string(),
                screen_sharing: false,
            }))
            .collect();
        let _ = tx.send(ServerMessage::JoinAccepted {
            self_id: id.clone(),
            participants: participants.clone(),
        });
        room.members.push(Member {
            id: id.clone(),
            display_name: display_name.to_string(),
            screen_sharing: false,
            joined_at: Utc::now(),
            tx,
        });

        info!(room_id, participant_id = %id, display_name, members = room.members.len(), "participant joined");
        self.events
            .emit(RelayEvent::participant_joined(room_id, id.as_str(), display_name));
        Ok((id, participants))
    }

    /// Remove a member, notify the others and close the room when empty.
    pub fn leave(&self, room_id: &str, id: &ParticipantId) {
        let mut rooms = self.rooms_mut();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(idx) = room.members.iter().position(|m| &m.id == id) else {
            return;
        };
        let member = room.members.remove(idx);
        room.broadcast_except(id, &ServerMessage::ParticipantLeft { id: id.clone() });
        info!(room_id, participant_id = %id, members = room.members.len(), "participant left");
        self.events
            .emit(RelayEvent::participant_left(room_id, id.as_str(), &member.display_name));

        if room.members.is_empty() {
            let protected = room.password_hash.is_some();
            rooms.remove(room_id);
            info!(room_id, "room closed (no members left)");
            self.events.emit(RelayEvent::room_closed(room_id, protected));
        }
    }

    /// Forward an opaque signal to another member of the same room.
    pub fn forward_signal(
        &self,
        room_id: &str,
        from: &ParticipantId,
        to: &ParticipantId,
        signal: serde_json::Value,
    ) -> bool {
        let rooms = self.rooms();
        let target = rooms
            .get(room_id)
            .and_then(|room| room.members.iter().find(|m| &m.id == to));
        match target {
            Some(member) => {
                debug!(room_id, from = %from, to = %to, "signal forwarded");
                member
                    .tx
                    .send(ServerMessage::Signal {
                        from_id: from.clone(),
                        signal,
                    })
                    .is_ok()
            }
            None => {
                warn!(room_id, from = %from, to = %to, "signal for unknown participant dropped");
                false
            }
        }
    }

    pub fn set_screen_sharing(&self, room_id: &str, id: &ParticipantId, sharing: bool) {
        let mut rooms = self.rooms_mut();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(member) = room.members.iter_mut().find(|m| &m.id == id) else {
            return;
        };
        if member.screen_sharing == sharing {
            return;
        }
        member.screen_sharing = sharing;
        let display_name = member.display_name.clone();
        room.broadcast_except(
            id,
            &ServerMessage::ParticipantScreenShareChanged {
                id: id.clone(),
                sharing,
            },
        );
        info!(room_id, participant_id = %id, sharing, "screen share changed");
        self.events
            .emit(RelayEvent::screen_share(room_id, id.as_str(), &display_name, sharing));
    }

    pub fn room_info(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms().get(room_id).map(RelayRoom::info)
    }

    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut infos: Vec<RoomInfo> = self.rooms().values().map(RelayRoom::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// `(rooms, participants)` currently active.
    pub fn counts(&self) -> (usize, usize) {
        let rooms = self.rooms();
        (rooms.len(), rooms.values().map(|r| r.members.len()).sum())
    }
}

// ─── Member connection driver ───────────────────────────────────────────────

/// Drive one member connection until `rx` closes or `cancel` fires, then
/// leave the room it joined.
pub async fn serve_member(
    state: Arc<RelayState>,
    mut rx: mpsc::UnboundedReceiver<ClientMessage>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    let mut joined: Option<(String, ParticipantId)> = None;

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let Some((room_id, id)) = &joined else {
            let ClientMessage::Join { room_id, display_name, password } = msg else {
                warn!("message before join ignored");
                continue;
            };
            match state.join(&room_id, &display_name, password.as_deref(), tx.clone()) {
                Ok((self_id, _)) => joined = Some((room_id, self_id)),
                Err(reason) => {
                    info!(room_id = %room_id, display_name = %display_name, reason, "join rejected");
                    let _ = tx.send(ServerMessage::JoinRejected {
                        reason: reason.to_string(),
                    });
                }
            }
            continue;
        };

        match msg {
            ClientMessage::Join { .. } => {
                warn!(room_id = %room_id, participant_id = %id, "duplicate join ignored");
            }
            ClientMessage::Signal { to_id, signal } => {
                state.forward_signal(room_id, id, &to_id, signal);
            }
            ClientMessage::ScreenShareStarted => state.set_screen_sharing(room_id, id, true),
            ClientMessage::ScreenShareStopped => state.set_screen_sharing(room_id, id, false),
        }
    }

    if let Some((room_id, id)) = joined {
        state.leave(&room_id, &id);
    }
}

// ─── Router ─────────────────────────────────────────────────────────────────

async fn version_header_middleware(request: Request, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        HeaderName::from_static("x-meshroom-version"),
        HeaderValue::from_static(VERSION),
    );
    response
}

fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        warn!("CORS: permissive mode (allow all origins)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("CORS: ignoring invalid origin '{s}'");
                None
            }
        })
        .collect();

    info!("CORS: restricted to {} origin(s)", origins.len());

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers([HeaderName::from_static("content-type")])
}

pub fn router(state: Arc<RelayState>) -> Router {
    let cors = build_cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(api::health))
        .route("/v1/rooms", get(api::list_rooms))
        .route("/v1/rooms/:room_id", get(api::get_room))
        .route("/v1/events", get(sse::sse_events))
        .layer(middleware::from_fn(version_header_middleware))
        .layer(cors)
        .with_state(state)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
