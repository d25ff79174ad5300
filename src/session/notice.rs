// src/session/notice.rs
//
// Session notices: what happened in the room, for whoever embeds the client.
//
// Room-level and per-peer outcomes are published as `SessionNotice`s on a
// `NoticeBus` backed by a `tokio::sync::broadcast` channel.  Per-peer failures
// only ever surface here, never as an `Err` from a room-level call.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::ParticipantId;
use crate::registry::StreamSlot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NoticeKind {
    ParticipantJoined { peer_id: ParticipantId, display_name: String },
    ParticipantLeft { peer_id: ParticipantId },
    PeerConnected { peer_id: ParticipantId },
    PeerFailed { peer_id: ParticipantId, reason: String },
    StreamAttached { peer_id: ParticipantId, screen: bool },
    ScreenShareChanged { peer_id: ParticipantId, sharing: bool },
    LocalScreenShareChanged { sharing: bool },
    RelayDisconnected,
    RelayReconnected { self_id: ParticipantId },
    RelayLost { reason: String },
    SessionClosed,
}

impl NoticeKind {
    pub fn stream_attached(peer_id: &ParticipantId, slot: StreamSlot) -> Self {
        Self::StreamAttached {
            peer_id: peer_id.clone(),
            screen: slot == StreamSlot::Screen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::PeerConnected { .. } => "peer_connected",
            Self::PeerFailed { .. } => "peer_failed",
            Self::StreamAttached { .. } => "stream_attached",
            Self::ScreenShareChanged { .. } => "screen_share_changed",
            Self::LocalScreenShareChanged { .. } => "local_screen_share_changed",
            Self::RelayDisconnected => "relay_disconnected",
            Self::RelayReconnected { .. } => "relay_reconnected",
            Self::RelayLost { .. } => "relay_lost",
            Self::SessionClosed => "session_closed",
        }
    }
}

/// ```json
/// {
///   "id":        "ntc_1f0c...",
///   "createdAt": "2026-03-02T10:00:00Z",
///   "roomId":    "alpha",
///   "type":      "peer_connected",
///   "peerId":    "5b1e..."
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotice {
    /// `ntc_<uuid-v4>`.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub room_id: String,
    #[serde(flatten)]
    pub kind: NoticeKind,
}

impl SessionNotice {
    pub fn new(room_id: &str, kind: NoticeKind) -> Self {
        Self {
            id: format!("ntc_{}", uuid::Uuid::new_v4()),
            created_at: Utc::now(),
            room_id: room_id.to_string(),
            kind,
        }
    }
}

/// Fan-out of notices.  Cheap to clone.
#[derive(Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<SessionNotice>,
}

impl NoticeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish; having no subscribers is normal.
    pub fn emit(&self, notice: SessionNotice) -> usize {
        debug!(notice = notice.kind.as_str(), notice_id = %notice.id, "notice emitted");
        self.tx.send(notice).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.tx.subscribe()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}
