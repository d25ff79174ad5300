//! Local and remote media handles.
//!
//! Capture devices are outside this crate: a [`MediaSource`] hands back
//! [`MediaStream`]s whose tracks wrap webrtc-rs sample tracks.  Whoever owns
//! the device writes samples through [`MediaTrack::write_sample`], which is
//! where local mute is enforced.

pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{MediaError, SessionError};

/// Opus frame that decodes to 20 ms of silence.
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

// ─── TrackKind ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

// ─── MediaTrack ─────────────────────────────────────────────────────────────

/// A local capture track.  Cheap to clone; clones share enablement and
/// lifetime.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    rtp: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>, stream_id: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let rtp = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.to_owned(),
        ));
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended,
                rtp,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        !*self.inner.ended.borrow()
    }

    /// End the track.  Idempotent; both the session and the capture platform
    /// call this.
    pub fn stop(&self) {
        let was_ended = self.inner.ended.send_replace(true);
        if !was_ended {
            info!(track_id = %self.inner.id, kind = %self.inner.kind, "local track stopped");
        }
    }

    /// Resolves once the track has ended, whoever stopped it.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        // The sender lives as long as `self`, so this only returns on `true`.
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Track handed to the transport when seeding a peer connection.
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.inner.rtp.clone()
    }

    /// Write one encoded sample.  While disabled, audio carries Opus silence
    /// and video frames are dropped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), MediaError> {
        if !self.is_live() {
            return Err(MediaError::TrackEnded(self.inner.id.clone()));
        }

        let result = if self.is_enabled() {
            self.inner.rtp.write_sample(sample).await
        } else {
            match self.inner.kind {
                TrackKind::Audio => {
                    let silence = Sample {
                        data: Bytes::from_static(&OPUS_SILENCE_FRAME),
                        duration: sample.duration,
                        ..Default::default()
                    };
                    self.inner.rtp.write_sample(&silence).await
                }
                TrackKind::Video => Ok(()),
            }
        };

        result.map_err(|e| MediaError::Write(e.to_string()))
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

// ─── MediaStream ────────────────────────────────────────────────────────────

/// A group of local tracks sharing one stream id (camera+mic, or a screen
/// capture).
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Build a stream with one fresh track per requested kind.
    pub fn with_kinds(label: &str, kinds: &[TrackKind]) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let tracks = kinds
            .iter()
            .map(|kind| MediaTrack::new(*kind, format!("{label}-{kind}"), &id))
            .collect();
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has_video(&self) -> bool {
        self.tracks_of(TrackKind::Video).next().is_some()
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

// ─── Remote media ───────────────────────────────────────────────────────────

/// A track announced by the transport for a remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// RTP reader; `None` for transports that do not carry real media.
    pub rtp: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Remote tracks grouped by stream id.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn from_track(track: RemoteTrack) -> Self {
        Self {
            id: track.stream_id.clone(),
            tracks: vec![track],
        }
    }

    /// Merge another stream with the same id, skipping tracks already held.
    pub fn merge(&mut self, other: RemoteStream) {
        for track in other.tracks {
            if !self.tracks.iter().any(|t| t.id == track.id) {
                self.tracks.push(track);
            }
        }
    }
}

// ─── MediaSource capability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

/// Device capture capability supplied by the embedding application.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Camera/microphone capture.
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;

    /// Screen capture.  A cancelled picker is `MediaError::CaptureDenied`.
    async fn display_media(&self) -> Result<MediaStream, MediaError>;
}

/// Acquire the local stream, degrading to audio-only when video is refused.
pub async fn acquire_local_media(source: &dyn MediaSource) -> Result<MediaStream, SessionError> {
    let full = MediaConstraints { audio: true, video: true };
    match source.user_media(full).await {
        Ok(stream) => {
            info!(stream_id = stream.id(), tracks = stream.tracks().len(), "local media acquired");
            Ok(stream)
        }
        Err(e) => {
            warn!("audio+video capture failed ({e}), trying audio only");
            let audio_only = MediaConstraints { audio: true, video: false };
            let stream = source.user_media(audio_only).await.map_err(|e| {
                warn!("audio-only capture failed: {e}");
                SessionError::MediaUnavailable(e.to_string())
            })?;
            info!(stream_id = stream.id(), "local media acquired (audio only)");
            Ok(stream)
        }
    }
}

/// Frame duration used by the synthetic and silence writers.
pub const AUDIO_FRAME: Duration = Duration::from_millis(20);

// ─── Tests ──────────────────────────────────────────────────────────────────
