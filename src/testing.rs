// In-process doubles for the capability traits, used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, RelayConfig};
use crate::error::{MediaError, RelayError, TransportError};
use crate::media::{MediaConstraints, MediaSource, MediaStream, RemoteTrack, TrackKind};
use crate::protocol::{ClientMessage, IceCandidate, ParticipantId, ServerMessage};
use crate::relay::{serve_member, RelayState};
use crate::relay_client::{RelayConnector, RelayLink, RetryPolicy};
use crate::session::SessionContext;
use crate::transport::{
    ConnectionState, PeerEventSink, PeerTransport, SdpKind, SessionDescription, Transport,
    TransportEvent,
};

// ─── Transport ──────────────────────────────────────────────────────────────

/// Scripted transport.  Connections "connect" as soon as the answering side
/// sets its local answer or the offering side applies the remote answer, and
/// deliver one remote audio track per connection.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<FakeInner>,
}

struct FakeInner {
    created: AtomicUsize,
    offers: AtomicUsize,
    closed: watch::Sender<usize>,
    fail_next_answer: AtomicBool,
    sinks: Mutex<HashMap<ParticipantId, PeerEventSink>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                created: AtomicUsize::new(0),
                offers: AtomicUsize::new(0),
                closed: watch::channel(0).0,
                fail_next_answer: AtomicBool::new(false),
                sinks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn offers(&self) -> usize {
        self.inner.offers.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        *self.inner.closed.borrow()
    }

    pub async fn wait_closed(&self, n: usize) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed >= n).await;
    }

    /// The next connection created fails in `create_answer`.
    pub fn fail_next_create_answer(&self) {
        self.inner.fail_next_answer.store(true, Ordering::SeqCst);
    }

    /// Raise an event on the latest connection created toward `peer`.
    pub fn emit(&self, peer: &ParticipantId, event: TransportEvent) {
        let sink = self.inner.sinks.lock().unwrap().get(peer).cloned();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    pub fn fail_peer(&self, peer: &ParticipantId) {
        self.emit(peer, TransportEvent::StateChanged(ConnectionState::Failed));
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn create_connection(
        &self,
        sink: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        self.inner
            .sinks
            .lock()
            .unwrap()
            .insert(sink.peer_id().clone(), sink.clone());
        Ok(Arc::new(FakePeer {
            owner: self.clone(),
            sink,
            fail_answer: self.inner.fail_next_answer.swap(false, Ordering::SeqCst),
            local: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakePeer {
    owner: FakeTransport,
    sink: PeerEventSink,
    fail_answer: bool,
    local: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerTransport for FakePeer {
    async fn add_local_stream(&self, _stream: &MediaStream) -> Result<(), TransportError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.owner.inner.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer("v=0 fake offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.fail_answer {
            return Err(TransportError::Description("scripted answer failure".into()));
        }
        Ok(SessionDescription::answer("v=0 fake answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let answered = desc.kind == SdpKind::Answer;
        *self.local.lock().unwrap() = Some(desc);
        if answered {
            self.sink
                .emit(TransportEvent::StateChanged(ConnectionState::Connected));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let peer = self.sink.peer_id().clone();
        self.sink.emit(TransportEvent::RemoteTrack(RemoteTrack {
            id: format!("{peer}-audio"),
            stream_id: format!("remote-{peer}"),
            kind: TrackKind::Audio,
            rtp: None,
        }));
        if desc.kind == SdpKind::Answer {
            self.sink
                .emit(TransportEvent::StateChanged(ConnectionState::Connected));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
        Ok(())
    }

    async fn wait_ice_gathering(&self, _timeout: Duration) -> bool {
        true
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.owner.inner.closed.send_modify(|n| *n += 1);
        self.sink
            .emit(TransportEvent::StateChanged(ConnectionState::Closed));
    }
}

// ─── Media ──────────────────────────────────────────────────────────────────

/// Holds a screen capture request open until released.
#[derive(Debug, Clone, Default)]
pub struct DisplayGate {
    /// Notified when the picker is opened.
    pub requested: Arc<Notify>,
    /// Completes the pending capture.
    pub release: Arc<Notify>,
}

/// Media source with scripted permission outcomes.
#[derive(Debug, Clone)]
pub struct ScriptedMediaSource {
    audio: bool,
    video: bool,
    display: bool,
    gate: Option<DisplayGate>,
}

impl ScriptedMediaSource {
    /// Everything granted.
    pub fn new() -> Self {
        Self {
            audio: true,
            video: true,
            display: true,
            gate: None,
        }
    }

    pub fn video_denied() -> Self {
        Self {
            video: false,
            ..Self::new()
        }
    }

    pub fn all_denied() -> Self {
        Self {
            audio: false,
            video: false,
            display: false,
            gate: None,
        }
    }

    /// The screen picker is cancelled.
    pub fn deny_display(mut self) -> Self {
        self.display = false;
        self
    }

    /// Screen captures block until the returned gate is released.
    pub fn hold_display(mut self) -> (Self, DisplayGate) {
        let gate = DisplayGate::default();
        self.gate = Some(gate.clone());
        (self, gate)
    }
}

#[async_trait]
impl MediaSource for ScriptedMediaSource {
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if (constraints.video && !self.video) || (constraints.audio && !self.audio) {
            return Err(MediaError::PermissionDenied("scripted denial".into()));
        }
        let mut kinds = Vec::new();
        if constraints.audio {
            kinds.push(TrackKind::Audio);
        }
        if constraints.video {
            kinds.push(TrackKind::Video);
        }
        Ok(MediaStream::with_kinds("cam", &kinds))
    }

    async fn display_media(&self) -> Result<MediaStream, MediaError> {
        if let Some(gate) = &self.gate {
            gate.requested.notify_one();
            gate.release.notified().await;
        }
        if !self.display {
            return Err(MediaError::CaptureDenied("picker cancelled".into()));
        }
        Ok(MediaStream::with_kinds("screen", &[TrackKind::Video]))
    }
}

// ─── Relay ──────────────────────────────────────────────────────────────────

/// Connector backed by an in-process `RelayState`, running the same member
/// loop as the WebSocket endpoint.
#[derive(Clone)]
pub struct LocalRelay {
    state: Arc<RelayState>,
    links: Arc<Mutex<Vec<CancellationToken>>>,
    refuse: Arc<AtomicBool>,
}

impl LocalRelay {
    pub fn new(state: Arc<RelayState>) -> Self {
        Self {
            state,
            links: Arc::new(Mutex::new(Vec::new())),
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(RelayState::new(RelayConfig::default())))
    }

    /// Another connector on the same relay, with its own links.
    pub fn sibling(&self) -> Self {
        Self::new(self.state.clone())
    }

    /// Drop every link made through this connector.
    pub fn sever_all(&self) {
        for token in self.links.lock().unwrap().drain(..) {
            token.cancel();
        }
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Join `room_id` directly and wait for the answer.
    pub async fn join_raw(&self, room_id: &str, name: &str) -> (RelayLink, ParticipantId) {
        let mut link = self.connect().await.unwrap();
        link.send(ClientMessage::Join {
            room_id: room_id.into(),
            display_name: name.into(),
            password: None,
        })
        .unwrap();
        match link.inbound.recv().await {
            Some(ServerMessage::JoinAccepted { self_id, .. }) => (link, self_id),
            other => panic!("expected joinAccepted, got {other:?}"),
        }
    }
}

#[async_trait]
impl RelayConnector for LocalRelay {
    async fn connect(&self) -> Result<RelayLink, RelayError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RelayError::Connect {
                url: "local".into(),
                reason: "refused".into(),
            });
        }
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.links.lock().unwrap().push(cancel.clone());
        tokio::spawn(serve_member(self.state.clone(), client_rx, server_tx, cancel));
        Ok(RelayLink {
            outbound: client_tx,
            inbound: server_rx,
        })
    }
}

/// Relay side of a scripted link: the test plays the relay.
pub struct RelayEnd {
    pub to_client: mpsc::UnboundedSender<ServerMessage>,
    pub from_client: mpsc::UnboundedReceiver<ClientMessage>,
}

impl RelayEnd {
    /// Next frame the client sent.
    pub async fn next(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("client frame in time")
            .expect("client link open")
    }

    /// Skip frames until a `signal` arrives.
    pub async fn next_signal(&mut self) -> (ParticipantId, serde_json::Value) {
        loop {
            if let ClientMessage::Signal { to_id, signal } = self.next().await {
                return (to_id, signal);
            }
        }
    }
}

/// Connector handing out links prepared by the test.
#[derive(Clone, Default)]
pub struct ScriptedRelay {
    links: Arc<Mutex<VecDeque<RelayLink>>>,
}

impl ScriptedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&self) -> RelayEnd {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.links
            .lock()
            .unwrap()
            .push_back(RelayLink { outbound, inbound });
        RelayEnd {
            to_client,
            from_client,
        }
    }
}

#[async_trait]
impl RelayConnector for ScriptedRelay {
    async fn connect(&self) -> Result<RelayLink, RelayError> {
        self.links.lock().unwrap().pop_front().ok_or(RelayError::Connect {
            url: "scripted".into(),
            reason: "no link prepared".into(),
        })
    }
}

// ─── Session context ────────────────────────────────────────────────────────

/// Context with short timeouts and a fast retry policy.
pub fn context(
    transport: &FakeTransport,
    relay: Arc<dyn RelayConnector>,
    media: ScriptedMediaSource,
) -> SessionContext {
    let mut ctx = SessionContext::new(
        &ClientConfig::default(),
        Arc::new(transport.clone()),
        relay,
        Arc::new(media),
    );
    ctx.ice_gather_timeout = Duration::from_millis(50);
    ctx.join_timeout = Duration::from_secs(2);
    ctx.retry = RetryPolicy {
        max_attempts: 100,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    };
    ctx
}

pub fn camera() -> MediaStream {
    MediaStream::with_kinds("cam", &[TrackKind::Audio, TrackKind::Video])
}
