// webrtc-rs implementation of the transport capability.
//
// One `API` instance (media engine + interceptors + setting engine) is built
// up front and shared by every peer connection of the process.  Candidates
// are bundled: callers wait for gathering to complete (bounded) and then read
// the local description, so no `on_ice_candidate` handler is installed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::MediaEngine;
use ::webrtc::api::setting_engine::SettingEngine;
use ::webrtc::api::{APIBuilder, API};
use ::webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use ::webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use ::webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use ::webrtc::track::track_local::TrackLocal;

use super::{
    ConnectionState, PeerEventSink, PeerTransport, SdpKind, SessionDescription, Transport,
    TransportEvent,
};
use crate::config::{ClientConfig, IceServerConfig};
use crate::error::TransportError;
use crate::media::{MediaStream, RemoteTrack, TrackKind};
use crate::protocol::IceCandidate;

// ─── Factory ────────────────────────────────────────────────────────────────

pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransport {
    pub fn new(cfg: &ClientConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        if cfg.udp_port_min > 0 && cfg.udp_port_max > 0 {
            let ephemeral = EphemeralUDP::new(cfg.udp_port_min, cfg.udp_port_max)
                .map_err(|e| TransportError::Create(format!("invalid UDP port range: {e}")))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
            info!("WebRTC UDP port range: {}-{}", cfg.udp_port_min, cfg.udp_port_max);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        Ok(Self {
            api,
            ice_servers: cfg.ice_servers().into_iter().map(to_rtc_ice_server).collect(),
        })
    }
}

fn to_rtc_ice_server(s: IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: s.urls,
        username: s.username.unwrap_or_default(),
        credential: s.credential.unwrap_or_default(),
        ..Default::default()
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_connection(
        &self,
        sink: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        let (gathered_tx, gathered_rx) = watch::channel(false);
        pc.on_ice_gathering_state_change(Box::new(move |state| {
            if state == RTCIceGathererState::Complete {
                gathered_tx.send_replace(true);
            }
            Box::pin(async {})
        }));

        {
            let sink = sink.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!(peer_id = %sink.peer_id(), epoch = sink.epoch(), "connection state: {state}");
                    if let Some(mapped) = map_state(state) {
                        sink.emit(TransportEvent::StateChanged(mapped));
                    }
                })
            }));
        }

        {
            let sink = sink.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        _ => TrackKind::Video,
                    };
                    info!(
                        peer_id = %sink.peer_id(),
                        "remote track: kind={kind}, ssrc={}, stream={}",
                        track.ssrc(),
                        track.stream_id()
                    );
                    sink.emit(TransportEvent::RemoteTrack(RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                        kind,
                        rtp: Some(track),
                    }));
                })
            }));
        }

        Ok(Arc::new(WebRtcPeer { pc, gathered: gathered_rx, sink }))
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

// ─── Peer handle ────────────────────────────────────────────────────────────

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    gathered: watch::Receiver<bool>,
    sink: PeerEventSink,
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| TransportError::Description(e.to_string()))
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), TransportError> {
        for track in stream.tracks() {
            let sender = self
                .pc
                .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::Track(e.to_string()))?;

            // RTCP must be drained for interceptors (NACK, reports) to work.
            tokio::spawn(async move {
                while sender.read_rtcp().await.is_ok() {}
            });
        }
        debug!(peer_id = %self.sink.peer_id(), stream_id = stream.id(), "local stream added");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Description(format!("create_offer failed: {e}")))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Description(format!("create_answer failed: {e}")))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| TransportError::Description(format!("set_local_description failed: {e}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| TransportError::Description(format!("set_remote_description failed: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn wait_ice_gathering(&self, timeout: Duration) -> bool {
        let mut rx = self.gathered.clone();
        let done = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|complete| *complete)).await,
            Ok(Ok(_))
        );
        if !done {
            warn!(
                peer_id = %self.sink.peer_id(),
                "ICE gathering incomplete after {timeout:?}, sending partial candidates"
            );
        }
        done
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        let kind = match desc.sdp_type {
            RTCSdpType::Answer | RTCSdpType::Pranswer => SdpKind::Answer,
            _ => SdpKind::Offer,
        };
        Some(SessionDescription { kind, sdp: desc.sdp })
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(peer_id = %self.sink.peer_id(), "peer connection close failed: {e}");
        }
    }
}
