//! Real-time transport capability.
//!
//! The session never talks to webrtc-rs directly.  It creates connections
//! through a [`Transport`] and drives them through [`PeerTransport`] handles;
//! everything a connection reports back (state changes, remote tracks, local
//! candidates) arrives as a [`PeerEvent`] on the session's event channel,
//! tagged with the peer id and connection epoch it was created under.

pub mod webrtc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::media::{MediaStream, RemoteTrack};
use crate::protocol::{IceCandidate, ParticipantId};

pub use self::webrtc::WebRtcTransport;

// ─── Descriptions & states ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// Transport-level connection state, as reported by the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    RemoteTrack(RemoteTrack),
    /// Asynchronous failure outside any request/response call.
    Error(TransportError),
}

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub peer_id: ParticipantId,
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Where a connection delivers its callbacks.  Cloned into every callback
/// closure; sending after the session has gone away is a silent no-op.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    peer_id: ParticipantId,
    epoch: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(peer_id: ParticipantId, epoch: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { peer_id, epoch, tx }
    }

    pub fn peer_id(&self) -> &ParticipantId {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(PeerEvent {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            event,
        });
    }
}

// ─── Capability traits ──────────────────────────────────────────────────────

/// Factory for peer connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_connection(
        &self,
        sink: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

/// One peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Wait for ICE gathering to finish, giving up after `timeout`.  Returns
    /// `true` when gathering completed.
    async fn wait_ice_gathering(&self, timeout: Duration) -> bool;

    /// Current local description, candidates included.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn close(&self);
}

impl std::fmt::Debug for dyn PeerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeerTransport")
    }
}
