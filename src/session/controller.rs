// Room session actor.
//
// One task per joined room.  It owns the roster, the peer registry and the
// local media, and is the only place any of them is mutated.  Relay frames,
// transport callbacks, finished background work and handle commands all
// arrive on channels and are dispatched one at a time by `run`.

use std::collections::HashMap;
use std::future::Future;

use futures::future::select_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{JoinRequest, NoticeBus, NoticeKind, ParticipantView, RoomView, SessionContext, SessionNotice};
use crate::error::{MediaError, RelayError, SessionError, TransportError};
use crate::local::LocalSession;
use crate::media::{MediaStream, MediaTrack};
use crate::protocol::{ClientMessage, ParticipantId, ParticipantInfo, ServerMessage, SignalPayload};
use crate::registry::PeerRegistry;
use crate::relay_client::{self, RelayLink};
use crate::roster::{Participant, RoomMembership};
use crate::signaling::{
    self, NegotiationPlan, Negotiated, RemoteOp, SignalAction, SignalingMachine, SignalingState,
    StateOutcome,
};
use crate::transport::{ConnectionState, PeerEvent, PeerEventSink, TransportEvent};

/// Requests made through a `RoomHandle`.
pub(crate) enum Command {
    ToggleAudio(oneshot::Sender<bool>),
    ToggleVideo(oneshot::Sender<bool>),
    StartScreenShare(oneshot::Sender<Result<MediaStream, SessionError>>),
    StopScreenShare(oneshot::Sender<()>),
    Membership(oneshot::Sender<RoomMembership>),
    Leave(oneshot::Sender<()>),
}

/// How a roster snapshot relates to the participants in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotRole {
    /// First join: everyone listed was here first, so we dial them.
    Joiner,
    /// Rejoin under the same id: newcomers arrived after us and dial us.
    Rejoined,
    /// Rejoin under a new id: every remote side sees a newcomer, so every
    /// connection is rebuilt from our side.
    NewIdentity,
}

/// Results of work the actor spawned.
enum Internal {
    Negotiated {
        peer_id: ParticipantId,
        epoch: u64,
        result: Result<Negotiated, TransportError>,
    },
    ScreenCaptured {
        capture_id: u64,
        result: Result<MediaStream, MediaError>,
        reply: oneshot::Sender<Result<MediaStream, SessionError>>,
    },
    ScreenCaptureEnded {
        capture_id: u64,
    },
    RelayRestored(Result<RelayLink, RelayError>),
}

pub(crate) struct Controller {
    ctx: SessionContext,
    request: JoinRequest,
    roster: RoomMembership,
    registry: PeerRegistry,
    local: LocalSession,
    notices: NoticeBus,
    view_tx: watch::Sender<RoomView>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    inbound: Option<mpsc::UnboundedReceiver<ServerMessage>>,
    /// `join` re-sent after a reconnect, answer not seen yet.
    rejoining: bool,
    cancel: CancellationToken,
    closed: bool,
}

impl Controller {
    /// Build the actor for an accepted join, dial everyone in the snapshot
    /// and replay `early` frames on top of it.  Must be called from within
    /// the runtime.
    pub(crate) fn start(
        ctx: SessionContext,
        request: JoinRequest,
        local_media: MediaStream,
        self_id: ParticipantId,
        participants: Vec<ParticipantInfo>,
        early: Vec<ServerMessage>,
        link: RelayLink,
        notices: NoticeBus,
    ) -> (Self, watch::Receiver<RoomView>) {
        let roster = RoomMembership::new(request.room_id.clone(), self_id);
        let local = LocalSession::new(local_media);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let initial = RoomView {
            room_id: request.room_id.clone(),
            local_id: roster.local_id.clone(),
            audio_enabled: local.audio_enabled(),
            video_enabled: local.video_enabled(),
            screen_sharing: false,
            relay_connected: true,
            closed: false,
            connections: 0,
            participants: Vec::new(),
        };
        let (view_tx, view_rx) = watch::channel(initial);

        let mut controller = Self {
            ctx,
            request,
            roster,
            registry: PeerRegistry::new(),
            local,
            notices,
            view_tx,
            peer_tx,
            peer_rx,
            internal_tx,
            internal_rx,
            outbound: Some(link.outbound),
            inbound: Some(link.inbound),
            rejoining: false,
            cancel: CancellationToken::new(),
            closed: false,
        };
        controller.apply_snapshot(participants, SnapshotRole::Joiner);
        for msg in early {
            controller.on_relay(msg);
        }
        controller.publish_view();
        (controller, view_rx)
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.on_command(cmd) {
                            break;
                        }
                    }
                    None => {
                        debug!(room_id = %self.roster.room_id, "all room handles dropped");
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = self.peer_rx.recv() => self.on_peer_event(event),
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
                frame = next_frame(&mut self.inbound) => match frame {
                    Some(msg) => self.on_relay(msg),
                    None => self.on_relay_lost(),
                },
            }
            self.publish_view();
        }
        self.publish_view();
    }

    // ── commands ────────────────────────────────────────────────────────────

    /// Returns `true` when the session is over.
    fn on_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::ToggleAudio(reply) => {
                let _ = reply.send(self.local.toggle_audio());
            }
            Command::ToggleVideo(reply) => {
                let _ = reply.send(self.local.toggle_video());
            }
            Command::StartScreenShare(reply) => self.start_screen_share(reply),
            Command::StopScreenShare(reply) => {
                self.stop_screen_share(None);
                let _ = reply.send(());
            }
            Command::Membership(reply) => {
                let _ = reply.send(self.roster.clone());
            }
            Command::Leave(reply) => {
                self.shutdown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn start_screen_share(&mut self, reply: oneshot::Sender<Result<MediaStream, SessionError>>) {
        let capture_id = match self.local.begin_capture() {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let source = self.ctx.media_source.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = source.display_media().await;
            if let Err(mpsc::error::SendError(Internal::ScreenCaptured { result: Ok(stream), .. })) =
                tx.send(Internal::ScreenCaptured { capture_id, result, reply })
            {
                stream.stop_all();
            }
        });
    }

    fn on_screen_captured(
        &mut self,
        capture_id: u64,
        result: Result<MediaStream, MediaError>,
        reply: oneshot::Sender<Result<MediaStream, SessionError>>,
    ) {
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                self.local.abort_capture(capture_id);
                warn!(room_id = %self.roster.room_id, "screen capture failed: {e}");
                let _ = reply.send(Err(SessionError::CaptureDenied(e.to_string())));
                return;
            }
        };
        if !self.local.finish_capture(capture_id, stream.clone()) {
            let err = if self.closed {
                SessionError::SessionClosed
            } else {
                SessionError::CaptureDenied("screen share stopped before capture completed".into())
            };
            let _ = reply.send(Err(err));
            return;
        }
        self.send_relay(ClientMessage::ScreenShareStarted);
        self.notify(NoticeKind::LocalScreenShareChanged { sharing: true });
        self.watch_capture_end(capture_id, stream.tracks().to_vec());
        let _ = reply.send(Ok(stream));
    }

    /// Report the capture as ended as soon as the platform ends any of its
    /// tracks.
    fn watch_capture_end(&self, capture_id: u64, tracks: Vec<MediaTrack>) {
        if tracks.is_empty() {
            return;
        }
        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let ended = select_all(tracks.iter().map(|t| Box::pin(t.ended())));
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = ended => {
                    let _ = tx.send(Internal::ScreenCaptureEnded { capture_id });
                }
            }
        });
    }

    /// `None` stops whatever is shared; `Some(id)` only that capture.
    fn stop_screen_share(&mut self, capture_id: Option<u64>) {
        if self.local.stop_screen_share(capture_id) {
            self.send_relay(ClientMessage::ScreenShareStopped);
            self.notify(NoticeKind::LocalScreenShareChanged { sharing: false });
        }
    }

    // ── relay frames ────────────────────────────────────────────────────────

    fn on_relay(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::JoinAccepted { self_id, participants } => {
                if !self.rejoining {
                    warn!(room_id = %self.roster.room_id, "unexpected joinAccepted ignored");
                    return;
                }
                self.rejoining = false;
                let identity_changed = self.roster.local_id != self_id;
                self.roster.local_id = self_id.clone();
                let role = if identity_changed {
                    SnapshotRole::NewIdentity
                } else {
                    SnapshotRole::Rejoined
                };
                self.apply_snapshot(participants, role);
                if self.local.is_sharing() {
                    self.send_relay(ClientMessage::ScreenShareStarted);
                }
                info!(room_id = %self.roster.room_id, self_id = %self_id, "rejoined room");
                self.notify(NoticeKind::RelayReconnected { self_id });
            }
            ServerMessage::JoinRejected { reason } => {
                if !self.rejoining {
                    warn!(room_id = %self.roster.room_id, "unexpected joinRejected ignored");
                    return;
                }
                error!(room_id = %self.roster.room_id, reason = %reason, "rejoin rejected");
                self.rejoining = false;
                self.outbound = None;
                self.inbound = None;
                self.notify(NoticeKind::RelayLost {
                    reason: format!("rejoin rejected: {reason}"),
                });
            }
            ServerMessage::ParticipantJoined { id, display_name } => {
                self.on_participant_joined(Participant {
                    id,
                    display_name,
                    screen_sharing: false,
                });
            }
            ServerMessage::ParticipantLeft { id } => self.on_participant_left(&id),
            ServerMessage::Signal { from_id, signal } => match SignalPayload::from_value(&signal) {
                Ok(payload) => self.on_signal(from_id, payload),
                Err(e) => warn!(peer_id = %from_id, "invalid signal dropped: {e}"),
            },
            ServerMessage::ParticipantScreenShareChanged { id, sharing } => {
                let known = self.roster.set_screen_sharing(&id, sharing);
                self.registry.set_screen_sharing(&id, sharing);
                if known {
                    info!(peer_id = %id, sharing, "remote screen share changed");
                    self.notify(NoticeKind::ScreenShareChanged { peer_id: id, sharing });
                } else {
                    debug!(peer_id = %id, "screen share change for unknown participant ignored");
                }
            }
        }
    }

    /// Reconcile roster and registry with a relay snapshot.  Who dials whom
    /// follows the later-arrival rule, see [`SnapshotRole`].
    fn apply_snapshot(&mut self, participants: Vec<ParticipantInfo>, role: SnapshotRole) {
        let snapshot = participants.into_iter().map(Participant::from).collect();
        let diff = self.roster.reconcile(snapshot);

        for id in diff.removed {
            self.registry.remove(&id);
            info!(peer_id = %id, "participant gone after reconnect");
            self.notify(NoticeKind::ParticipantLeft { peer_id: id });
        }
        for p in &diff.added {
            self.notify(NoticeKind::ParticipantJoined {
                peer_id: p.id.clone(),
                display_name: p.display_name.clone(),
            });
        }

        match role {
            SnapshotRole::Joiner => {
                for p in &diff.added {
                    self.initiate_toward(p);
                }
            }
            SnapshotRole::Rejoined => {
                for p in &diff.added {
                    self.await_offer_from(p);
                }
            }
            SnapshotRole::NewIdentity => {
                let dropped = self.registry.drain();
                debug!(room_id = %self.roster.room_id, dropped, "local id changed, renegotiating");
                for p in self.roster.remote().to_vec() {
                    self.initiate_toward(&p);
                }
            }
        }
        for p in self.roster.remote() {
            self.registry.set_screen_sharing(&p.id, p.screen_sharing);
        }
    }

    /// Register a placeholder for a participant that will dial us.
    fn await_offer_from(&mut self, participant: &Participant) {
        if !self.local.media_available() {
            warn!(peer_id = %participant.id, "no local media, participant will not be connected");
            return;
        }
        if self
            .registry
            .upsert(
                &participant.id,
                &participant.display_name,
                SignalingMachine::awaiting(),
                participant.screen_sharing,
            )
            .is_some()
        {
            debug!(peer_id = %participant.id, state = %SignalingState::AwaitingSignal, "placeholder registered");
        }
    }

    fn on_participant_joined(&mut self, participant: Participant) {
        let id = participant.id.clone();
        let name = participant.display_name.clone();
        if !self.roster.insert(participant) {
            debug!(peer_id = %id, "duplicate or self participantJoined ignored");
            return;
        }
        info!(peer_id = %id, display_name = %name, "participant joined");
        self.notify(NoticeKind::ParticipantJoined {
            peer_id: id.clone(),
            display_name: name.clone(),
        });

        // The newcomer initiates; wait for its offer.
        self.await_offer_from(&Participant {
            id,
            display_name: name,
            screen_sharing: false,
        });
    }

    fn on_participant_left(&mut self, id: &ParticipantId) {
        let known = self.roster.remove(id).is_some();
        let had_peer = self.registry.remove(id).is_some();
        if known || had_peer {
            info!(peer_id = %id, "participant left");
            self.notify(NoticeKind::ParticipantLeft { peer_id: id.clone() });
        } else {
            debug!(peer_id = %id, "participantLeft for unknown participant ignored");
        }
    }

    fn on_signal(&mut self, from_id: ParticipantId, payload: SignalPayload) {
        let kind = payload.kind();
        let Some(entry) = self.registry.get_mut(&from_id) else {
            warn!(peer_id = %from_id, kind, "signal from unknown peer dropped");
            return;
        };
        let epoch = entry.epoch;
        let action = entry.machine.on_remote_signal(payload);
        let state = entry.machine.state();

        match action {
            SignalAction::CreateAnswer { offer_sdp } => {
                if !self.local.media_available() {
                    self.fail_peer(&from_id, "local media unavailable".into());
                    return;
                }
                debug!(peer_id = %from_id, "answering offer");
                let plan = self.plan(&from_id, epoch);
                self.spawn_negotiation(from_id, epoch, signaling::respond(plan, offer_sdp));
            }
            SignalAction::ApplyAnswer { answer_sdp } => {
                self.registry.push_remote_op(&from_id, RemoteOp::Answer(answer_sdp));
            }
            SignalAction::AddCandidate(candidate) => {
                self.registry.push_remote_op(&from_id, RemoteOp::Candidate(candidate));
            }
            SignalAction::Ignore(why) => {
                warn!(peer_id = %from_id, kind, state = %state, "signal ignored: {why}");
            }
        }
    }

    // ── negotiation ─────────────────────────────────────────────────────────

    fn initiate_toward(&mut self, participant: &Participant) {
        if !self.local.media_available() {
            warn!(peer_id = %participant.id, "no local media, participant will not be connected");
            return;
        }
        let mut machine = SignalingMachine::idle();
        machine.begin_initiating();
        let Some(epoch) = self.registry.upsert(
            &participant.id,
            &participant.display_name,
            machine,
            participant.screen_sharing,
        ) else {
            return;
        };
        debug!(peer_id = %participant.id, epoch, "initiating");
        let plan = self.plan(&participant.id, epoch);
        self.spawn_negotiation(participant.id.clone(), epoch, signaling::initiate(plan));
    }

    fn plan(&self, peer_id: &ParticipantId, epoch: u64) -> NegotiationPlan {
        NegotiationPlan {
            peer_id: peer_id.clone(),
            transport: self.ctx.transport.clone(),
            sink: PeerEventSink::new(peer_id.clone(), epoch, self.peer_tx.clone()),
            streams: self.local.seeding_streams(),
            ice_timeout: self.ctx.ice_gather_timeout,
        }
    }

    fn spawn_negotiation<F>(&self, peer_id: ParticipantId, epoch: u64, negotiation: F)
    where
        F: Future<Output = Result<Negotiated, TransportError>> + Send + 'static,
    {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = negotiation.await;
            if let Err(mpsc::error::SendError(Internal::Negotiated { result: Ok(n), .. })) =
                tx.send(Internal::Negotiated { peer_id, epoch, result })
            {
                n.handle.close().await;
            }
        });
    }

    fn on_negotiated(
        &mut self,
        peer_id: ParticipantId,
        epoch: u64,
        result: Result<Negotiated, TransportError>,
    ) {
        let current = self.registry.current_mut(&peer_id, epoch).is_some();
        let negotiated = match result {
            Ok(n) => n,
            Err(e) if current => {
                self.fail_peer(&peer_id, e.to_string());
                return;
            }
            Err(e) => {
                debug!(peer_id = %peer_id, epoch, "stale negotiation failed: {e}");
                return;
            }
        };

        let sink = PeerEventSink::new(peer_id.clone(), epoch, self.peer_tx.clone());
        let ops = signaling::spawn_remote_applier(negotiated.handle.clone(), sink);
        if let Err(handle) = self.registry.install_handle(&peer_id, epoch, negotiated.handle, ops) {
            debug!(peer_id = %peer_id, epoch, "negotiation outlived its peer, closing");
            tokio::spawn(async move { handle.close().await });
            return;
        }

        self.send_relay(ClientMessage::Signal {
            to_id: peer_id.clone(),
            signal: negotiated.local.to_value(),
        });

        let Some(entry) = self.registry.current_mut(&peer_id, epoch) else {
            return;
        };
        match negotiated.local {
            SignalPayload::Offer { .. } => {
                entry.machine.offer_sent();
            }
            SignalPayload::Answer { .. } => {
                entry.machine.answer_sent();
            }
            SignalPayload::Candidate { .. } => {}
        }
        let state = entry.machine.state();
        info!(peer_id = %peer_id, state = %state, "local description sent");
        if state == SignalingState::Connected {
            self.notify(NoticeKind::PeerConnected { peer_id });
        }
    }

    // ── transport callbacks ─────────────────────────────────────────────────

    fn on_peer_event(&mut self, PeerEvent { peer_id, epoch, event }: PeerEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                let Some(entry) = self.registry.current_mut(&peer_id, epoch) else {
                    debug!(peer_id = %peer_id, epoch, %state, "state change for stale connection");
                    return;
                };
                match entry.machine.on_connection_state(state) {
                    StateOutcome::Connected => {
                        info!(peer_id = %peer_id, "peer connected");
                        self.notify(NoticeKind::PeerConnected { peer_id });
                    }
                    StateOutcome::Failed => self.fail_peer(&peer_id, format!("connection {state}")),
                    StateOutcome::Unchanged if state == ConnectionState::Disconnected => {
                        warn!(peer_id = %peer_id, "peer connection interrupted");
                    }
                    StateOutcome::Unchanged => debug!(peer_id = %peer_id, %state, "connection state"),
                }
            }
            TransportEvent::RemoteTrack(track) => {
                let kind = track.kind;
                match self.registry.attach_remote_track(&peer_id, epoch, track) {
                    Some(slot) => {
                        debug!(peer_id = %peer_id, %kind, ?slot, "remote track attached");
                        self.notify(NoticeKind::stream_attached(&peer_id, slot));
                    }
                    None => debug!(peer_id = %peer_id, epoch, "track for stale connection dropped"),
                }
            }
            TransportEvent::Error(e) => {
                if self.registry.current_mut(&peer_id, epoch).is_some() {
                    self.fail_peer(&peer_id, e.to_string());
                }
            }
        }
    }

    /// Drop the peer's connection.  It stays in the roster; it is only
    /// dialed again after a reconnect that changes the local id.
    fn fail_peer(&mut self, peer_id: &ParticipantId, reason: String) {
        if self.registry.remove(peer_id).is_none() {
            return;
        }
        let err = SessionError::PeerNegotiationFailed {
            peer: peer_id.clone(),
            reason: reason.clone(),
        };
        warn!(room_id = %self.roster.room_id, "{err}");
        self.notify(NoticeKind::PeerFailed {
            peer_id: peer_id.clone(),
            reason,
        });
    }

    // ── background results ──────────────────────────────────────────────────

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Negotiated { peer_id, epoch, result } => self.on_negotiated(peer_id, epoch, result),
            Internal::ScreenCaptured { capture_id, result, reply } => {
                self.on_screen_captured(capture_id, result, reply)
            }
            Internal::ScreenCaptureEnded { capture_id } => {
                debug!(capture_id, "capture ended by the platform");
                self.stop_screen_share(Some(capture_id));
            }
            Internal::RelayRestored(result) => self.on_relay_restored(result),
        }
    }

    // ── relay connectivity ──────────────────────────────────────────────────

    fn on_relay_lost(&mut self) {
        self.inbound = None;
        self.outbound = None;
        self.rejoining = false;
        if self.closed {
            return;
        }
        warn!(room_id = %self.roster.room_id, peers = self.registry.len(), "relay connection lost");
        self.notify(NoticeKind::RelayDisconnected);

        let relay = self.ctx.relay.clone();
        let policy = self.ctx.retry.clone();
        let cancel = self.cancel.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = relay_client::reconnect(relay.as_ref(), &policy, &cancel).await;
            let _ = tx.send(Internal::RelayRestored(result));
        });
    }

    fn on_relay_restored(&mut self, result: Result<RelayLink, RelayError>) {
        if self.closed {
            return;
        }
        match result {
            Ok(link) => {
                if link.send(self.request.to_message()).is_err() {
                    self.on_relay_lost();
                    return;
                }
                info!(room_id = %self.roster.room_id, "relay reconnected, rejoining");
                self.outbound = Some(link.outbound);
                self.inbound = Some(link.inbound);
                self.rejoining = true;
            }
            Err(e) => {
                error!(room_id = %self.roster.room_id, "relay lost: {e}");
                self.notify(NoticeKind::RelayLost { reason: e.to_string() });
            }
        }
    }

    fn send_relay(&self, msg: ClientMessage) {
        let kind = frame_kind(&msg);
        match &self.outbound {
            Some(tx) if tx.send(msg).is_ok() => debug!(kind, "frame queued"),
            _ => warn!(room_id = %self.roster.room_id, kind, "relay unavailable, frame dropped"),
        }
    }

    // ── teardown & presentation ─────────────────────────────────────────────

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let peers = self.registry.drain();
        self.roster.clear();
        self.local.shutdown();
        self.outbound = None;
        self.inbound = None;
        self.cancel.cancel();
        info!(room_id = %self.roster.room_id, peers, "left room");
        self.notify(NoticeKind::SessionClosed);
    }

    fn notify(&self, kind: NoticeKind) {
        self.notices.emit(SessionNotice::new(&self.roster.room_id, kind));
    }

    fn publish_view(&self) {
        let mut peers: HashMap<ParticipantId, _> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|v| (v.id.clone(), v))
            .collect();
        let participants = self
            .roster
            .remote()
            .iter()
            .map(|p| {
                let peer = peers.remove(&p.id);
                ParticipantView {
                    id: p.id.clone(),
                    display_name: p.display_name.clone(),
                    screen_sharing: p.screen_sharing,
                    state: peer.as_ref().map(|v| v.state),
                    primary: peer.as_ref().and_then(|v| v.primary.clone()),
                    screen: peer.and_then(|v| v.screen),
                }
            })
            .collect();

        self.view_tx.send_replace(RoomView {
            room_id: self.roster.room_id.clone(),
            local_id: self.roster.local_id.clone(),
            audio_enabled: self.local.audio_enabled(),
            video_enabled: self.local.video_enabled(),
            screen_sharing: self.local.is_sharing(),
            relay_connected: self.outbound.is_some() && !self.rejoining,
            closed: self.closed,
            connections: self.registry.len(),
            participants,
        });
    }
}

async fn next_frame(inbound: &mut Option<mpsc::UnboundedReceiver<ServerMessage>>) -> Option<ServerMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn frame_kind(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Join { .. } => "join",
        ClientMessage::Signal { .. } => "signal",
        ClientMessage::ScreenShareStarted => "screenShareStarted",
        ClientMessage::ScreenShareStopped => "screenShareStopped",
    }
}
