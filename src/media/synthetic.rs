// Synthetic capture for hosts without devices (the headless client, CI).

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::media::Sample;

use super::{MediaConstraints, MediaSource, MediaStream, TrackKind, AUDIO_FRAME, OPUS_SILENCE_FRAME};
use crate::error::MediaError;

/// Produces silent audio and, optionally, an (idle) video track.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    video: bool,
}

impl SyntheticMediaSource {
    pub fn new(video: bool) -> Self {
        Self { video }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if constraints.video && !self.video {
            return Err(MediaError::DeviceUnavailable("no synthetic camera".into()));
        }
        let mut kinds = Vec::with_capacity(2);
        if constraints.audio {
            kinds.push(TrackKind::Audio);
        }
        if constraints.video {
            kinds.push(TrackKind::Video);
        }
        Ok(MediaStream::with_kinds("synthetic", &kinds))
    }

    async fn display_media(&self) -> Result<MediaStream, MediaError> {
        Err(MediaError::CaptureDenied("no display to capture on this host".into()))
    }
}

/// Feed every live audio track of `stream` with Opus silence until `cancel`
/// fires or all audio tracks end.
pub async fn pump_silence(stream: MediaStream, cancel: CancellationToken) {
    let audio: Vec<_> = stream.tracks_of(TrackKind::Audio).cloned().collect();
    if audio.is_empty() {
        return;
    }
    info!(stream_id = stream.id(), tracks = audio.len(), "silence pump started");

    let mut ticker = tokio::time::interval(AUDIO_FRAME);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let sample = Sample {
                    data: Bytes::from_static(&OPUS_SILENCE_FRAME),
                    duration: AUDIO_FRAME,
                    ..Default::default()
                };
                let mut live = 0;
                for track in &audio {
                    if track.write_sample(&sample).await.is_ok() {
                        live += 1;
                    }
                }
                if live == 0 {
                    debug!("all audio tracks ended");
                    break;
                }
            }
        }
    }
    info!(stream_id = stream.id(), "silence pump stopped");
}
