//! Room sessions.
//!
//! [`join`] connects to the relay, waits for the join answer and hands the
//! session to a single actor task that owns the roster,
//! the peer registry and the local media.  Everything that happens to the
//! session (relay frames, transport callbacks, calls made through the
//! [`RoomHandle`]) is funneled through that actor's dispatch loop.

mod controller;
pub mod notice;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{RelayError, SessionError};
use crate::media::{MediaSource, MediaStream, RemoteStream};
use crate::protocol::{ClientMessage, ParticipantId, ParticipantInfo, ServerMessage};
use crate::relay_client::{RelayConnector, RelayLink, RetryPolicy};
use crate::roster::RoomMembership;
use crate::signaling::SignalingState;
use crate::transport::Transport;

use controller::{Command, Controller};
pub use notice::{NoticeBus, NoticeKind, SessionNotice};

// ─── Context & request ──────────────────────────────────────────────────────

/// Capabilities and tuning shared by every session of a process.
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub relay: Arc<dyn RelayConnector>,
    pub media_source: Arc<dyn MediaSource>,
    pub ice_gather_timeout: Duration,
    pub join_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SessionContext {
    pub fn new(
        cfg: &ClientConfig,
        transport: Arc<dyn Transport>,
        relay: Arc<dyn RelayConnector>,
        media_source: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            transport,
            relay,
            media_source,
            ice_gather_timeout: cfg.ice_gather_timeout,
            join_timeout: cfg.join_timeout,
            retry: cfg.retry_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room_id: String,
    pub display_name: String,
    pub password: Option<String>,
}

impl JoinRequest {
    pub(crate) fn to_message(&self) -> ClientMessage {
        ClientMessage::Join {
            room_id: self.room_id.clone(),
            display_name: self.display_name.clone(),
            password: self.password.clone(),
        }
    }
}

// ─── Presentation view ──────────────────────────────────────────────────────

/// One remote participant as presentation sees it.  `state` is `None` for a
/// participant without a connection (skipped or failed).
#[derive(Debug, Clone)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub display_name: String,
    pub screen_sharing: bool,
    pub state: Option<SignalingState>,
    pub primary: Option<RemoteStream>,
    pub screen: Option<RemoteStream>,
}

/// Published after every event the session handles.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub room_id: String,
    pub local_id: ParticipantId,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub relay_connected: bool,
    pub closed: bool,
    /// Peer connections held (live or being negotiated).
    pub connections: usize,
    pub participants: Vec<ParticipantView>,
}

impl RoomView {
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| &p.id == id)
    }
}

// ─── Handle ─────────────────────────────────────────────────────────────────

/// Caller side of a joined room.  Cheap to clone; the session ends on
/// [`RoomHandle::leave`] or when every handle is dropped.
#[derive(Clone)]
pub struct RoomHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<RoomView>,
    notices: NoticeBus,
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.view_rx.borrow();
        f.debug_struct("RoomHandle")
            .field("room_id", &view.room_id)
            .field("local_id", &view.local_id)
            .field("closed", &view.closed)
            .finish_non_exhaustive()
    }
}

impl RoomHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Flip local audio; returns the new enabled state.
    pub async fn toggle_audio(&self) -> Result<bool, SessionError> {
        self.request(Command::ToggleAudio).await
    }

    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        self.request(Command::ToggleVideo).await
    }

    /// Capture the screen and announce it.  Returns the capture stream for
    /// self-preview.
    pub async fn start_screen_share(&self) -> Result<MediaStream, SessionError> {
        self.request(Command::StartScreenShare).await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.request(Command::StopScreenShare).await
    }

    pub async fn membership(&self) -> Result<RoomMembership, SessionError> {
        self.request(Command::Membership).await
    }

    /// Tear the session down.  Calling it again is a no-op.
    pub async fn leave(&self) -> Result<(), SessionError> {
        match self.request(Command::Leave).await {
            Ok(()) | Err(SessionError::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn view(&self) -> RoomView {
        self.view_rx.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<RoomView> {
        self.view_rx.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Resolves once the session has shut down.
    pub async fn closed(&self) {
        let mut rx = self.view_rx.clone();
        let _ = rx.wait_for(|v| v.closed).await;
    }
}

// ─── join ───────────────────────────────────────────────────────────────────

/// Join `request.room_id` with an already acquired local stream.
///
/// On success every participant already in the room is dialed (the joiner
/// initiates); later arrivals dial us.
pub async fn join(
    ctx: SessionContext,
    local_media: MediaStream,
    request: JoinRequest,
) -> Result<RoomHandle, SessionError> {
    let mut link = ctx.relay.connect().await?;
    link.send(request.to_message())?;

    let JoinAnswer {
        self_id,
        participants,
        early,
    } = await_join_answer(&mut link, ctx.join_timeout).await?;
    info!(
        room_id = %request.room_id,
        self_id = %self_id,
        present = participants.len(),
        "joined room"
    );

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let notices = NoticeBus::new();
    let (controller, view_rx) = Controller::start(
        ctx,
        request,
        local_media,
        self_id,
        participants,
        early,
        link,
        notices.clone(),
    );
    tokio::spawn(controller.run(cmd_rx));

    Ok(RoomHandle {
        cmd_tx,
        view_rx,
        notices,
    })
}

/// Accepted join.  `early` holds room frames that arrived ahead of the
/// answer, in arrival order; they are replayed after the snapshot.
pub(crate) struct JoinAnswer {
    pub self_id: ParticipantId,
    pub participants: Vec<ParticipantInfo>,
    pub early: Vec<ServerMessage>,
}

/// Wait for `joinAccepted`/`joinRejected`, holding back anything else.
pub(crate) async fn await_join_answer(
    link: &mut RelayLink,
    timeout: Duration,
) -> Result<JoinAnswer, SessionError> {
    let mut early = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let msg = match tokio::time::timeout_at(deadline, link.inbound.recv()).await {
            Err(_) => return Err(RelayError::JoinTimeout(timeout).into()),
            Ok(None) => return Err(RelayError::Closed.into()),
            Ok(Some(msg)) => msg,
        };
        match msg {
            ServerMessage::JoinAccepted { self_id, participants } => {
                return Ok(JoinAnswer {
                    self_id,
                    participants,
                    early,
                })
            }
            ServerMessage::JoinRejected { reason } => {
                warn!(reason = %reason, "join rejected");
                return Err(SessionError::JoinRejected { reason });
            }
            other => {
                debug!(kind = other.kind(), "frame before join answer held back");
                early.push(other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::REASON_BAD_PASSWORD;
    use crate::testing::{camera, context, FakeTransport, LocalRelay, RelayEnd, ScriptedMediaSource, ScriptedRelay};
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::sync::Mutex;

    fn request(room: &str, name: &str) -> JoinRequest {
        JoinRequest {
            room_id: room.into(),
            display_name: name.into(),
            password: None,
        }
    }

    fn info(id: &str) -> ParticipantInfo {
        ParticipantInfo {
            id: id.into(),
            display_name: id.to_uppercase(),
            screen_sharing: false,
        }
    }

    async fn wait_view(handle: &RoomHandle, what: &str, pred: impl Fn(&RoomView) -> bool) -> RoomView {
        let mut rx = handle.watch_view();
        let view = tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|v| pred(v)))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .expect("view channel open");
        view.clone()
    }

    fn state_of(view: &RoomView, id: &str) -> Option<SignalingState> {
        view.participant(&id.into()).and_then(|p| p.state)
    }

    /// Session joined through a scripted relay as "me", with `present`
    /// already in the room.
    async fn scripted_session(
        transport: &FakeTransport,
        media: ScriptedMediaSource,
        present: &[&str],
    ) -> (RoomHandle, RelayEnd) {
        let relay = ScriptedRelay::new();
        let mut end = relay.prepare();
        let mut participants: Vec<ParticipantInfo> = present.iter().map(|id| info(id)).collect();
        participants.push(info("me"));
        end.to_client
            .send(ServerMessage::JoinAccepted {
                self_id: "me".into(),
                participants,
            })
            .unwrap();
        let handle = join(context(transport, Arc::new(relay), media), camera(), request("alpha", "Me"))
            .await
            .unwrap();
        assert!(matches!(end.next().await, ClientMessage::Join { .. }));
        (handle, end)
    }

    fn joined(id: &str) -> ServerMessage {
        ServerMessage::ParticipantJoined {
            id: id.into(),
            display_name: id.to_uppercase(),
        }
    }

    fn offer_from(id: &str) -> ServerMessage {
        ServerMessage::Signal {
            from_id: id.into(),
            signal: json!({ "type": "offer", "sdp": "v=0 remote offer" }),
        }
    }

    async fn connected_peer(handle: &RoomHandle, end: &mut RelayEnd, id: &str) {
        end.to_client.send(joined(id)).unwrap();
        end.to_client.send(offer_from(id)).unwrap();
        let (to, signal) = end.next_signal().await;
        assert_eq!(to.as_str(), id);
        assert_eq!(signal["type"], "answer");
        wait_view(handle, "peer connected", |v| state_of(v, id) == Some(SignalingState::Connected)).await;
    }

    #[tokio::test]
    async fn alpha_scenario_later_arrival_initiates() {
        let relay = LocalRelay::with_defaults();
        let transport = FakeTransport::new();
        let media = ScriptedMediaSource::new();

        let a = join(context(&transport, Arc::new(relay.clone()), media.clone()), camera(), request("alpha", "A"))
            .await
            .unwrap();
        let a_id = a.view().local_id;
        assert!(a.view().participants.is_empty());
        assert_eq!(transport.created(), 0);

        let b = join(context(&transport, Arc::new(relay.clone()), media), camera(), request("alpha", "B"))
            .await
            .unwrap();
        let b_id = b.view().local_id;

        let b_view = wait_view(&b, "B connected to A", |v| {
            state_of(v, a_id.as_str()) == Some(SignalingState::Connected)
        })
        .await;
        let a_view = wait_view(&a, "A connected to B", |v| {
            state_of(v, b_id.as_str()) == Some(SignalingState::Connected)
        })
        .await;
        assert!(b_view.participant(&a_id).unwrap().primary.is_some());
        assert!(a_view.participant(&b_id).unwrap().primary.is_some());
        // one offer in total: B toward A
        assert_eq!(transport.offers(), 1);
        assert_eq!(transport.created(), 2);

        let mut a_notices = a.notices();
        b.leave().await.unwrap();
        let a_view = wait_view(&a, "B removed", |v| v.participants.is_empty()).await;
        assert_eq!(a_view.connections, 0);
        let left = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(n) = a_notices.recv().await {
                    if let NoticeKind::ParticipantLeft { peer_id } = n.kind {
                        return peer_id;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(left, b_id);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let relay = LocalRelay::with_defaults();
        let transport = FakeTransport::new();
        let mut req = request("vault", "A");
        req.password = Some("hunter2".into());
        let _a = join(context(&transport, Arc::new(relay.clone()), ScriptedMediaSource::new()), camera(), req)
            .await
            .unwrap();

        let mut req = request("vault", "B");
        req.password = Some("guess".into());
        let err = join(context(&transport, Arc::new(relay), ScriptedMediaSource::new()), camera(), req)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::JoinRejected { ref reason } if reason == REASON_BAD_PASSWORD));
    }

    /// Accepts frames and never answers.
    #[derive(Default)]
    struct SilentRelay {
        ends: Mutex<Vec<RelayEnd>>,
    }

    #[async_trait]
    impl RelayConnector for SilentRelay {
        async fn connect(&self) -> Result<RelayLink, RelayError> {
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.ends.lock().unwrap().push(RelayEnd { to_client, from_client });
            Ok(RelayLink { outbound, inbound })
        }
    }

    #[tokio::test]
    async fn join_times_out_without_answer() {
        let transport = FakeTransport::new();
        let relay = Arc::new(SilentRelay::default());
        let mut ctx = context(&transport, relay, ScriptedMediaSource::new());
        ctx.join_timeout = Duration::from_millis(50);
        let err = join(ctx, camera(), request("alpha", "A")).await.unwrap_err();
        assert!(matches!(err, SessionError::RelayDisconnected(RelayError::JoinTimeout(_))));
    }

    #[tokio::test]
    async fn snapshot_dials_everyone_but_self() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &["x", "y"]).await;

        let mut targets = vec![end.next_signal().await.0.to_string(), end.next_signal().await.0.to_string()];
        targets.sort();
        assert_eq!(targets, vec!["x", "y"]);

        let view = wait_view(&handle, "offers sent", |v| {
            state_of(v, "x") == Some(SignalingState::OfferSent) && state_of(v, "y") == Some(SignalingState::OfferSent)
        })
        .await;
        assert!(view.participant(&"me".into()).is_none());
        assert_eq!(transport.offers(), 2);
    }

    #[tokio::test]
    async fn duplicate_join_is_a_noop() {
        let transport = FakeTransport::new();
        let (handle, end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;

        end.to_client.send(joined("x")).unwrap();
        end.to_client.send(joined("x")).unwrap();
        end.to_client.send(joined("me")).unwrap();
        end.to_client.send(joined("y")).unwrap();

        let view = wait_view(&handle, "y registered", |v| v.participant(&"y".into()).is_some()).await;
        assert_eq!(view.participants.len(), 2);
        assert_eq!(view.connections, 2);
        assert_eq!(state_of(&view, "x"), Some(SignalingState::AwaitingSignal));
        // placeholders wait for the newcomer's offer
        assert_eq!(transport.created(), 0);
    }

    #[tokio::test]
    async fn offer_from_newcomer_is_answered() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        connected_peer(&handle, &mut end, "x").await;
        assert_eq!(transport.created(), 1);
        assert_eq!(transport.offers(), 0);

        // a repeated offer does not restart negotiation
        end.to_client.send(offer_from("x")).unwrap();
        end.to_client.send(joined("barrier")).unwrap();
        let view = wait_view(&handle, "barrier", |v| v.participant(&"barrier".into()).is_some()).await;
        assert_eq!(state_of(&view, "x"), Some(SignalingState::Connected));
        assert_eq!(transport.created(), 1);
    }

    #[tokio::test]
    async fn signal_after_leave_is_dropped() {
        let transport = FakeTransport::new();
        let (handle, end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;

        end.to_client.send(joined("x")).unwrap();
        end.to_client.send(ServerMessage::ParticipantLeft { id: "x".into() }).unwrap();
        end.to_client.send(offer_from("x")).unwrap();
        end.to_client.send(joined("barrier")).unwrap();

        let view = wait_view(&handle, "barrier", |v| v.participant(&"barrier".into()).is_some()).await;
        assert!(view.participant(&"x".into()).is_none());
        assert_eq!(view.connections, 1);
        assert_eq!(transport.created(), 0);
    }

    #[tokio::test]
    async fn malformed_signal_is_dropped() {
        let transport = FakeTransport::new();
        let (handle, end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;

        end.to_client.send(joined("x")).unwrap();
        end.to_client
            .send(ServerMessage::Signal {
                from_id: "x".into(),
                signal: json!({ "type": "offer", "sdp": "  " }),
            })
            .unwrap();
        end.to_client.send(joined("barrier")).unwrap();

        let view = wait_view(&handle, "barrier", |v| v.participant(&"barrier".into()).is_some()).await;
        assert_eq!(state_of(&view, "x"), Some(SignalingState::AwaitingSignal));
        assert_eq!(transport.created(), 0);
    }

    #[tokio::test]
    async fn toggles_never_touch_peers() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        connected_peer(&handle, &mut end, "x").await;

        assert!(!handle.toggle_audio().await.unwrap());
        assert!(!handle.view().audio_enabled);
        assert!(handle.toggle_audio().await.unwrap());
        assert!(!handle.toggle_video().await.unwrap());

        let view = handle.view();
        assert!(view.audio_enabled);
        assert!(!view.video_enabled);
        assert_eq!(state_of(&view, "x"), Some(SignalingState::Connected));
        assert_eq!(transport.created(), 1);
        assert_eq!(transport.closed(), 0);
    }

    #[tokio::test]
    async fn explicit_screen_share_stop() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;

        let screen = handle.start_screen_share().await.unwrap();
        assert!(matches!(end.next().await, ClientMessage::ScreenShareStarted));
        assert!(handle.view().screen_sharing);
        assert!(matches!(handle.start_screen_share().await, Ok(_)));
        assert!(matches!(end.next().await, ClientMessage::ScreenShareStarted));
        // the replaced capture is stopped
        assert_eq!(screen.live_track_count(), 0);

        handle.stop_screen_share().await.unwrap();
        assert!(matches!(end.next().await, ClientMessage::ScreenShareStopped));
        let view = handle.view();
        assert!(!view.screen_sharing);
    }

    #[tokio::test]
    async fn platform_ended_capture_is_cleaned_up() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        let mut notices = handle.notices();

        let screen = handle.start_screen_share().await.unwrap();
        assert!(matches!(end.next().await, ClientMessage::ScreenShareStarted));

        screen.tracks()[0].stop();
        assert!(matches!(end.next().await, ClientMessage::ScreenShareStopped));
        let view = wait_view(&handle, "share stopped", |v| !v.screen_sharing).await;
        assert!(!view.screen_sharing);
        assert_eq!(screen.live_track_count(), 0);

        let mut changes = Vec::new();
        while let Ok(n) = notices.try_recv() {
            if let NoticeKind::LocalScreenShareChanged { sharing } = n.kind {
                changes.push(sharing);
            }
        }
        assert_eq!(changes, vec![true, false]);
    }

    #[tokio::test]
    async fn cancelled_picker_is_capture_denied() {
        let transport = FakeTransport::new();
        let (handle, _end) = scripted_session(&transport, ScriptedMediaSource::new().deny_display(), &[]).await;

        let err = handle.start_screen_share().await.unwrap_err();
        assert!(matches!(err, SessionError::CaptureDenied(_)));
        let view = handle.view();
        assert!(!view.screen_sharing);
        assert!(!view.closed);
        // a later attempt is not blocked by the failed one
        assert!(matches!(handle.start_screen_share().await, Err(SessionError::CaptureDenied(_))));
    }

    #[tokio::test]
    async fn remote_screen_flag_only_for_known_peers() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        connected_peer(&handle, &mut end, "x").await;

        end.to_client
            .send(ServerMessage::ParticipantScreenShareChanged { id: "ghost".into(), sharing: true })
            .unwrap();
        end.to_client
            .send(ServerMessage::ParticipantScreenShareChanged { id: "x".into(), sharing: true })
            .unwrap();
        let view = wait_view(&handle, "x sharing", |v| {
            v.participant(&"x".into()).is_some_and(|p| p.screen_sharing)
        })
        .await;
        assert!(view.participant(&"ghost".into()).is_none());
        assert_eq!(view.connections, 1);
    }

    #[tokio::test]
    async fn peer_failure_is_isolated() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        let mut notices = handle.notices();
        connected_peer(&handle, &mut end, "x").await;
        connected_peer(&handle, &mut end, "y").await;

        transport.fail_peer(&"x".into());
        let view = wait_view(&handle, "x dropped", |v| state_of(v, "x").is_none()).await;
        assert_eq!(state_of(&view, "y"), Some(SignalingState::Connected));
        assert!(view.participant(&"x".into()).is_some());
        assert_eq!(view.connections, 1);
        assert!(!view.closed);

        let failed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(n) = notices.recv().await {
                    if let NoticeKind::PeerFailed { peer_id, .. } = n.kind {
                        return peer_id;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(failed.as_str(), "x");
        assert!(handle.toggle_audio().await.is_ok());
    }

    #[tokio::test]
    async fn failed_answer_removes_only_that_peer() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        connected_peer(&handle, &mut end, "x").await;

        transport.fail_next_create_answer();
        end.to_client.send(joined("y")).unwrap();
        end.to_client.send(offer_from("y")).unwrap();
        let view = wait_view(&handle, "y failed", |v| {
            v.participant(&"y".into()).is_some() && state_of(v, "y").is_none()
        })
        .await;
        assert_eq!(state_of(&view, "x"), Some(SignalingState::Connected));
    }

    #[tokio::test]
    async fn reconnect_reconciles_roster() {
        let relay = LocalRelay::with_defaults();
        let others = relay.sibling();
        let transport = FakeTransport::new();

        let (_b_link, b_id) = others.join_raw("alpha", "B").await;
        let (d_link, d_id) = others.join_raw("alpha", "D").await;

        let handle = join(context(&transport, Arc::new(relay.clone()), ScriptedMediaSource::new()), camera(), request("alpha", "S"))
            .await
            .unwrap();
        let first_id = handle.view().local_id;
        let mut notices = handle.notices();
        wait_view(&handle, "offers out", |v| {
            state_of(v, b_id.as_str()) == Some(SignalingState::OfferSent)
                && state_of(v, d_id.as_str()) == Some(SignalingState::OfferSent)
        })
        .await;

        relay.set_refuse(true);
        relay.sever_all();
        let view = wait_view(&handle, "relay down", |v| !v.relay_connected).await;
        // peers are left alone while disconnected
        assert_eq!(view.connections, 2);

        drop(d_link);
        let (_c_link, c_id) = others.join_raw("alpha", "C").await;
        relay.set_refuse(false);

        let view = wait_view(&handle, "rejoined", |v| {
            v.relay_connected && v.participant(&c_id).is_some() && v.participant(&d_id).is_none()
        })
        .await;
        assert_ne!(view.local_id, first_id);
        let mut ids: Vec<String> = view.participants.iter().map(|p| p.id.to_string()).collect();
        ids.sort();
        let mut expected = vec![b_id.to_string(), c_id.to_string()];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(view.connections, 2);

        let mut kinds = Vec::new();
        while let Ok(n) = notices.try_recv() {
            kinds.push(n.kind.as_str());
        }
        assert!(kinds.contains(&"relay_disconnected"));
        assert!(kinds.contains(&"relay_reconnected"));
        assert!(kinds.contains(&"participant_left"));
    }

    #[tokio::test]
    async fn relay_exhaustion_keeps_peers() {
        let transport = FakeTransport::new();
        let relay = ScriptedRelay::new();
        let end = relay.prepare();
        end.to_client
            .send(ServerMessage::JoinAccepted {
                self_id: "me".into(),
                participants: vec![info("x"), info("me")],
            })
            .unwrap();
        let mut ctx = context(&transport, Arc::new(relay), ScriptedMediaSource::new());
        ctx.retry.max_attempts = 2;
        let handle = join(ctx, camera(), request("alpha", "Me")).await.unwrap();
        let mut notices = handle.notices();
        wait_view(&handle, "offer out", |v| state_of(v, "x") == Some(SignalingState::OfferSent)).await;

        drop(end);
        let lost = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(n) = notices.recv().await {
                    if let NoticeKind::RelayLost { reason } = n.kind {
                        return reason;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert!(lost.contains("2 attempt"));
        let view = handle.view();
        assert!(!view.relay_connected);
        assert!(!view.closed);
        assert_eq!(state_of(&view, "x"), Some(SignalingState::OfferSent));
    }

    #[tokio::test]
    async fn frames_ahead_of_join_answer_are_replayed() {
        let transport = FakeTransport::new();
        let relay = ScriptedRelay::new();
        let mut end = relay.prepare();
        // c joined between our admission and the snapshot reaching us
        end.to_client.send(joined("c")).unwrap();
        end.to_client
            .send(ServerMessage::JoinAccepted {
                self_id: "me".into(),
                participants: vec![info("me")],
            })
            .unwrap();
        end.to_client.send(offer_from("c")).unwrap();

        let handle = join(context(&transport, Arc::new(relay), ScriptedMediaSource::new()), camera(), request("alpha", "Me"))
            .await
            .unwrap();
        assert!(matches!(end.next().await, ClientMessage::Join { .. }));

        let (to, signal) = end.next_signal().await;
        assert_eq!(to.as_str(), "c");
        assert_eq!(signal["type"], "answer");
        let view = wait_view(&handle, "c connected", |v| state_of(v, "c") == Some(SignalingState::Connected)).await;
        assert_eq!(view.participants.len(), 1);
        assert_eq!(transport.offers(), 0);
        assert_eq!(transport.created(), 1);
    }

    #[tokio::test]
    async fn same_id_rejoin_waits_for_newcomers_to_dial() {
        let transport = FakeTransport::new();
        let relay = ScriptedRelay::new();
        let end = relay.prepare();
        end.to_client
            .send(ServerMessage::JoinAccepted {
                self_id: "me".into(),
                participants: vec![info("x"), info("me")],
            })
            .unwrap();
        let handle = join(context(&transport, Arc::new(relay.clone()), ScriptedMediaSource::new()), camera(), request("alpha", "Me"))
            .await
            .unwrap();
        wait_view(&handle, "offer to x", |v| state_of(v, "x") == Some(SignalingState::OfferSent)).await;

        // y arrives while we are away; the relay hands our id back
        let mut again = relay.prepare();
        again
            .to_client
            .send(ServerMessage::JoinAccepted {
                self_id: "me".into(),
                participants: vec![info("x"), info("me"), info("y")],
            })
            .unwrap();
        drop(end);

        let view = wait_view(&handle, "rejoined", |v| v.relay_connected && v.participant(&"y".into()).is_some()).await;
        assert_eq!(view.local_id.as_str(), "me");
        assert_eq!(state_of(&view, "y"), Some(SignalingState::AwaitingSignal));
        assert_eq!(state_of(&view, "x"), Some(SignalingState::OfferSent));
        assert_eq!(transport.offers(), 1);

        again.to_client.send(offer_from("y")).unwrap();
        let (to, signal) = again.next_signal().await;
        assert_eq!(to.as_str(), "y");
        assert_eq!(signal["type"], "answer");
        wait_view(&handle, "y connected", |v| state_of(v, "y") == Some(SignalingState::Connected)).await;
        assert_eq!(transport.offers(), 1);
    }

    #[tokio::test]
    async fn stop_while_capturing_discards_the_capture() {
        let transport = FakeTransport::new();
        let (media, gate) = ScriptedMediaSource::new().hold_display();
        let (handle, mut end) = scripted_session(&transport, media, &[]).await;

        let starter = handle.clone();
        let pending = tokio::spawn(async move { starter.start_screen_share().await });
        gate.requested.notified().await;

        handle.stop_screen_share().await.unwrap();
        gate.release.notify_one();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::CaptureDenied(_))));

        let view = handle.view();
        assert!(!view.screen_sharing);
        assert!(end.from_client.try_recv().is_err());
        // a new request goes through afterwards
        gate.release.notify_one();
        assert!(handle.start_screen_share().await.is_ok());
        assert!(matches!(end.next().await, ClientMessage::ScreenShareStarted));
    }

    #[tokio::test]
    async fn handle_debug_names_the_room() {
        let transport = FakeTransport::new();
        let (handle, _end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        let rendered = format!("{handle:?}");
        assert!(rendered.contains("alpha"));
        assert!(rendered.contains("me"));
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let transport = FakeTransport::new();
        let (handle, mut end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        connected_peer(&handle, &mut end, "x").await;
        let mut notices = handle.notices();

        handle.leave().await.unwrap();
        handle.leave().await.unwrap();
        handle.closed().await;

        let view = handle.view();
        assert!(view.closed);
        assert!(view.participants.is_empty());
        assert_eq!(view.connections, 0);
        tokio::time::timeout(Duration::from_secs(1), transport.wait_closed(1))
            .await
            .unwrap();
        assert!(matches!(handle.toggle_audio().await, Err(SessionError::SessionClosed)));

        let mut closed_notices = 0;
        while let Ok(n) = notices.try_recv() {
            if n.kind == NoticeKind::SessionClosed {
                closed_notices += 1;
            }
        }
        assert_eq!(closed_notices, 1);
        // the relay side sees the channel close
        assert!(end.from_client.recv().await.is_none());
    }

    #[tokio::test]
    async fn registry_tracks_roster_under_random_churn() {
        let transport = FakeTransport::new();
        let (handle, end) = scripted_session(&transport, ScriptedMediaSource::new(), &[]).await;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let pool = ["p0", "p1", "p2", "p3", "p4", "p5", "p6", "p7"];

        for round in 0..20 {
            for _ in 0..25 {
                let id = pool[rng.gen_range(0..pool.len())];
                let msg = if rng.gen_bool(0.6) {
                    joined(id)
                } else {
                    ServerMessage::ParticipantLeft { id: id.into() }
                };
                end.to_client.send(msg).unwrap();
            }
            let barrier = format!("barrier-{round}");
            end.to_client.send(joined(&barrier)).unwrap();
            let view = wait_view(&handle, "barrier", |v| v.participant(&barrier.as_str().into()).is_some()).await;

            assert_eq!(view.connections, view.participants.len());
            assert!(view.participants.iter().all(|p| p.state.is_some()));
            let membership = handle.membership().await.unwrap();
            assert_eq!(membership.len(), view.participants.len());
            assert!(!membership.contains(&"me".into()));
        }
    }
}
