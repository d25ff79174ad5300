use thiserror::Error;

use crate::protocol::ParticipantId;

// ─── Room-level errors ──────────────────────────────────────────────────────

/// Failures surfaced to the caller of a room session.
///
/// Only room-level conditions reach this type.  Per-peer failures are
/// contained by the session and reported as notices instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The relay refused the join (wrong password, room full, ...).
    #[error("join rejected by relay: {reason}")]
    JoinRejected { reason: String },

    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("screen capture denied: {0}")]
    CaptureDenied(String),

    #[error("negotiation with peer '{peer}' failed: {reason}")]
    PeerNegotiationFailed { peer: ParticipantId, reason: String },

    #[error("relay disconnected: {0}")]
    RelayDisconnected(#[from] RelayError),

    #[error("a screen capture request is already in progress")]
    ScreenShareBusy,

    #[error("the room session has been closed")]
    SessionClosed,
}

impl From<MediaError> for SessionError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::CaptureDenied(reason) => Self::CaptureDenied(reason),
            other => Self::MediaUnavailable(other.to_string()),
        }
    }
}

// ─── Component errors ───────────────────────────────────────────────────────

/// Errors raised by a Transport Capability implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to create peer connection: {0}")]
    Create(String),

    #[error("session description error: {0}")]
    Description(String),

    #[error("ice candidate rejected: {0}")]
    Candidate(String),

    #[error("failed to attach local track: {0}")]
    Track(String),

    #[error("local description unavailable after ICE gathering")]
    NoLocalDescription,
}

impl From<webrtc::Error> for TransportError {
    fn from(err: webrtc::Error) -> Self {
        Self::Create(err.to_string())
    }
}

/// Errors on the relay channel.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("could not connect to relay at {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("relay channel closed")]
    Closed,

    #[error("no answer to join within {0:?}")]
    JoinTimeout(std::time::Duration),

    #[error("gave up reconnecting after {0} attempt(s)")]
    Exhausted(u32),
}

/// Errors raised by a media source or local track.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture denied: {0}")]
    CaptureDenied(String),

    #[error("track '{0}' has ended")]
    TrackEnded(String),

    #[error("sample write failed: {0}")]
    Write(String),
}

/// A `signal` payload that failed validation at the relay boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed signal payload: {0}")]
    MalformedSignal(String),

    #[error("session description has an empty body")]
    EmptyDescription,

    #[error("ice candidate is empty")]
    EmptyCandidate,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
