// src/relay/events.rs
//
// Relay event bus.
//
// Room and membership changes on the relay are published as `RelayEvent`s on
// a single `EventBus` (a `tokio::sync::broadcast` channel).  The SSE endpoint
// is the consumer; tests subscribe directly.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

// ─── Event types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "room.opened")]
    RoomOpened,
    #[serde(rename = "room.closed")]
    RoomClosed,
    #[serde(rename = "participant.joined")]
    ParticipantJoined,
    #[serde(rename = "participant.left")]
    ParticipantLeft,
    #[serde(rename = "screen_share.started")]
    ScreenShareStarted,
    #[serde(rename = "screen_share.stopped")]
    ScreenShareStopped,
}

impl EventType {
    /// Used for SSE `event:` fields and `types=` filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoomOpened => "room.opened",
            Self::RoomClosed => "room.closed",
            Self::ParticipantJoined => "participant.joined",
            Self::ParticipantLeft => "participant.left",
            Self::ScreenShareStarted => "screen_share.started",
            Self::ScreenShareStopped => "screen_share.stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string())).ok()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPayload {
    pub room_id: String,
    pub password_protected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantPayload {
    pub room_id: String,
    pub participant_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Room(RoomPayload),
    Participant(ParticipantPayload),
}

// ─── Envelope ───────────────────────────────────────────────────────────────

/// ```json
/// {
///   "id":         "evt_a1b2c3d4-...",
///   "type":       "participant.joined",
///   "created_at": "2026-03-02T10:00:00Z",
///   "data": { "room_id": "alpha", "participant_id": "...", "display_name": "Ada" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    /// `evt_<uuid-v4>`.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    pub data: EventPayload,
}

impl RelayEvent {
    pub fn room_opened(room_id: &str, password_protected: bool) -> Self {
        Self::room(EventType::RoomOpened, room_id, password_protected)
    }

    pub fn room_closed(room_id: &str, password_protected: bool) -> Self {
        Self::room(EventType::RoomClosed, room_id, password_protected)
    }

    pub fn participant_joined(room_id: &str, participant_id: &str, display_name: &str) -> Self {
        Self::participant(EventType::ParticipantJoined, room_id, participant_id, display_name)
    }

    pub fn participant_left(room_id: &str, participant_id: &str, display_name: &str) -> Self {
        Self::participant(EventType::ParticipantLeft, room_id, participant_id, display_name)
    }

    pub fn screen_share(room_id: &str, participant_id: &str, display_name: &str, sharing: bool) -> Self {
        let event_type = if sharing {
            EventType::ScreenShareStarted
        } else {
            EventType::ScreenShareStopped
        };
        Self::participant(event_type, room_id, participant_id, display_name)
    }

    fn room(event_type: EventType, room_id: &str, password_protected: bool) -> Self {
        Self::new(
            event_type,
            EventPayload::Room(RoomPayload {
                room_id: room_id.to_string(),
                password_protected,
            }),
        )
    }

    fn participant(event_type: EventType, room_id: &str, participant_id: &str, display_name: &str) -> Self {
        Self::new(
            event_type,
            EventPayload::Participant(ParticipantPayload {
                room_id: room_id.to_string(),
                participant_id: participant_id.to_string(),
                display_name: display_name.to_string(),
            }),
        )
    }

    fn new(event_type: EventType, data: EventPayload) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            event_type,
            created_at: Utc::now(),
            data,
        }
    }

    pub fn room_id(&self) -> &str {
        match &self.data {
            EventPayload::Room(p) => &p.room_id,
            EventPayload::Participant(p) => &p.room_id,
        }
    }
}

// ─── EventBus ───────────────────────────────────────────────────────────────

/// Broadcast fan-out of `RelayEvent`s.  Subscribers lagging by more than the
/// capacity skip events.  Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4096);
        Self { tx }
    }

    /// Publish; returns the number of subscribers reached.  No subscribers is
    /// the normal case when nobody watches `/v1/events`.
    pub fn emit(&self, event: RelayEvent) -> usize {
        debug!(event_type = %event.event_type, event_id = %event.id, "event emitted");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
