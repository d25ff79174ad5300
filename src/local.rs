// Local media state and controls: mute toggles and screen capture.
//
// Toggles only flip track enablement; peers keep their tracks and receive
// silence (audio) or nothing (video) while muted.

use tracing::info;

use crate::error::SessionError;
use crate::media::{MediaStream, TrackKind};

#[derive(Debug)]
struct ScreenShare {
    capture_id: u64,
    stream: MediaStream,
}

#[derive(Debug)]
pub struct LocalSession {
    media: Option<MediaStream>,
    screen: Option<ScreenShare>,
    audio_enabled: bool,
    video_enabled: bool,
    capture_in_flight: Option<u64>,
    next_capture_id: u64,
}

impl LocalSession {
    pub fn new(media: MediaStream) -> Self {
        let audio_enabled = media.tracks_of(TrackKind::Audio).all(|t| t.is_enabled());
        let video_enabled = media.tracks_of(TrackKind::Video).all(|t| t.is_enabled());
        Self {
            media: Some(media),
            screen: None,
            audio_enabled,
            video_enabled,
            capture_in_flight: None,
            next_capture_id: 0,
        }
    }

    pub fn media(&self) -> Option<&MediaStream> {
        self.media.as_ref()
    }

    /// `true` while the local stream still has a live track to offer peers.
    pub fn media_available(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.live_track_count() > 0)
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn screen_stream(&self) -> Option<&MediaStream> {
        self.screen.as_ref().map(|s| &s.stream)
    }

    pub fn is_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.audio_enabled = !self.audio_enabled;
        self.apply(TrackKind::Audio, self.audio_enabled);
        self.audio_enabled
    }

    pub fn toggle_video(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        self.apply(TrackKind::Video, self.video_enabled);
        self.video_enabled
    }

    fn apply(&self, kind: TrackKind, enabled: bool) {
        if let Some(media) = &self.media {
            for track in media.tracks_of(kind) {
                track.set_enabled(enabled);
            }
        }
        info!(%kind, enabled, "local track toggled");
    }

    /// Streams a new peer connection is seeded with.
    pub fn seeding_streams(&self) -> Vec<MediaStream> {
        let mut streams: Vec<MediaStream> = self.media.iter().cloned().collect();
        if let Some(screen) = &self.screen {
            streams.push(screen.stream.clone());
        }
        streams
    }

    /// Reserve a capture id for a screen capture request.
    pub fn begin_capture(&mut self) -> Result<u64, SessionError> {
        if self.capture_in_flight.is_some() {
            return Err(SessionError::ScreenShareBusy);
        }
        self.next_capture_id += 1;
        self.capture_in_flight = Some(self.next_capture_id);
        Ok(self.next_capture_id)
    }

    /// The capture request `capture_id` failed or was abandoned.
    pub fn abort_capture(&mut self, capture_id: u64) {
        if self.capture_in_flight == Some(capture_id) {
            self.capture_in_flight = None;
        }
    }

    /// Install a completed capture.  Returns `false` (and stops the stream)
    /// when the request is no longer current.
    pub fn finish_capture(&mut self, capture_id: u64, stream: MediaStream) -> bool {
        if self.capture_in_flight != Some(capture_id) {
            stream.stop_all();
            return false;
        }
        self.capture_in_flight = None;
        if let Some(previous) = self.screen.take() {
            previous.stream.stop_all();
        }
        info!(capture_id, stream_id = stream.id(), "screen share started");
        self.screen = Some(ScreenShare { capture_id, stream });
        true
    }

    /// Stop the screen share.  With `Some(id)` only that capture is stopped,
    /// so a late end notification for a replaced capture is harmless.  `None`
    /// also abandons a capture still in flight.  Returns `true` when a share
    /// was actually stopped.
    pub fn stop_screen_share(&mut self, capture_id: Option<u64>) -> bool {
        if capture_id.is_none() {
            if let Some(pending) = self.capture_in_flight.take() {
                info!(capture_id = pending, "pending screen capture abandoned");
            }
        }
        let matches = match (&self.screen, capture_id) {
            (Some(_), None) => true,
            (Some(share), Some(id)) => share.capture_id == id,
            (None, _) => false,
        };
        if !matches {
            return false;
        }
        if let Some(share) = self.screen.take() {
            share.stream.stop_all();
            info!(capture_id = share.capture_id, "screen share stopped");
        }
        true
    }

    /// Stop every local track.  Idempotent.
    pub fn shutdown(&mut self) {
        self.stop_screen_share(None);
        self.capture_in_flight = None;
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
    }
}
