// src/protocol.rs
//
// Wire protocol between participants and the signaling relay.
//
// Every frame is a JSON object with a `type` discriminator:
//
//   client -> relay   join, signal, screenShareStarted, screenShareStopped
//   relay  -> client  joinAccepted, joinRejected, participantJoined,
//                     participantLeft, signal, participantScreenShareChanged
//
// The relay treats `signal` payloads as opaque JSON.  Clients validate them
// into a `SignalPayload` before they reach the signaling state machine.
//
// ────────────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

// ─── Identity ───────────────────────────────────────────────────────────────

/// Relay-assigned participant identity, unique per relay connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id (used by the relay when a connection joins).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Roster entry as announced by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub display_name: String,
    #[serde(default)]
    pub screen_sharing: bool,
}

// ─── Frames ─────────────────────────────────────────────────────────────────

/// Frames sent by a participant to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        room_id: String,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Signal {
        to_id: ParticipantId,
        signal: Value,
    },
    ScreenShareStarted,
    ScreenShareStopped,
}

/// Frames sent by the relay to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    JoinAccepted {
        self_id: ParticipantId,
        participants: Vec<ParticipantInfo>,
    },
    JoinRejected {
        reason: String,
    },
    ParticipantJoined {
        id: ParticipantId,
        display_name: String,
    },
    ParticipantLeft {
        id: ParticipantId,
    },
    Signal {
        from_id: ParticipantId,
        signal: Value,
    },
    ParticipantScreenShareChanged {
        id: ParticipantId,
        sharing: bool,
    },
}

impl ServerMessage {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinAccepted { .. } => "joinAccepted",
            Self::JoinRejected { .. } => "joinRejected",
            Self::ParticipantJoined { .. } => "participantJoined",
            Self::ParticipantLeft { .. } => "participantLeft",
            Self::Signal { .. } => "signal",
            Self::ParticipantScreenShareChanged { .. } => "participantScreenShareChanged",
        }
    }
}

// ─── Signal payloads ────────────────────────────────────────────────────────

/// ICE candidate in the W3C `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Validated content of a `signal` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl SignalPayload {
    /// Parse and validate an opaque payload received from the relay.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let payload: SignalPayload = serde_json::from_value(value.clone())
            .map_err(|e| ProtocolError::MalformedSignal(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn to_value(&self) -> Value {
        // A tagged enum of strings always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::Offer { sdp } | Self::Answer { sdp } if sdp.trim().is_empty() => {
                Err(ProtocolError::EmptyDescription)
            }
            Self::Candidate { candidate } if candidate.candidate.trim().is_empty() => {
                Err(ProtocolError::EmptyCandidate)
            }
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
