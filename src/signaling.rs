//! Per-peer signaling state machine and the bundled-ICE negotiation steps.
//!
//! The machine itself is synchronous: the session actor feeds it remote
//! signals and transport state changes and acts on what it returns.  The
//! slow parts (creating a connection, producing a description, waiting for
//! ICE gathering) live in [`initiate`] and [`respond`], which the actor runs
//! on spawned tasks and reports back as events.
//!
//! ```text
//!  initiator:  Idle ─► Initiating ─► OfferSent ──────────────► Connected
//!  responder:  AwaitingSignal ─► Answering ─► AnswerSent ─────► Connected
//!                                  any state ─► Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::media::MediaStream;
use crate::protocol::{IceCandidate, ParticipantId, SignalPayload};
use crate::transport::{
    ConnectionState, PeerEventSink, PeerTransport, SessionDescription, Transport, TransportEvent,
};

// ─── State machine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalingState {
    Idle,
    Initiating,
    OfferSent,
    AwaitingSignal,
    Answering,
    AnswerSent,
    Connected,
    Closed,
}

impl std::fmt::Display for SignalingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// What the session must do with a remote signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalAction {
    /// Create the connection, apply the offer and send back an answer.
    CreateAnswer { offer_sdp: String },
    ApplyAnswer { answer_sdp: String },
    AddCandidate(IceCandidate),
    /// Out-of-order or duplicate; log and drop.
    Ignore(&'static str),
}

/// Effect of a transport state change on the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOutcome {
    Connected,
    Failed,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct SignalingMachine {
    state: SignalingState,
    answer_applied: bool,
    connected_early: bool,
}

impl SignalingMachine {
    pub fn idle() -> Self {
        Self::with_state(SignalingState::Idle)
    }

    /// Placeholder for a later arrival: it initiates, we wait for its offer.
    pub fn awaiting() -> Self {
        Self::with_state(SignalingState::AwaitingSignal)
    }

    fn with_state(state: SignalingState) -> Self {
        Self {
            state,
            answer_applied: false,
            connected_early: false,
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SignalingState::Closed
    }

    /// `Idle → Initiating`.
    pub fn begin_initiating(&mut self) -> bool {
        self.transition(SignalingState::Idle, SignalingState::Initiating)
    }

    /// `Initiating → OfferSent`, once the bundled offer is on the wire.
    pub fn offer_sent(&mut self) -> bool {
        self.transition(SignalingState::Initiating, SignalingState::OfferSent)
    }

    /// `Answering → AnswerSent`, or straight to `Connected` when the
    /// transport already reported connectivity.
    pub fn answer_sent(&mut self) -> bool {
        if !self.transition(SignalingState::Answering, SignalingState::AnswerSent) {
            return false;
        }
        if self.connected_early {
            self.state = SignalingState::Connected;
        }
        true
    }

    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
    }

    fn transition(&mut self, from: SignalingState, to: SignalingState) -> bool {
        if self.state != from {
            return false;
        }
        self.state = to;
        true
    }

    pub fn on_remote_signal(&mut self, payload: SignalPayload) -> SignalAction {
        use SignalingState::*;

        match payload {
            SignalPayload::Offer { sdp } => match self.state {
                Idle | AwaitingSignal => {
                    self.state = Answering;
                    SignalAction::CreateAnswer { offer_sdp: sdp }
                }
                Initiating | OfferSent => SignalAction::Ignore("offer while our own offer is outstanding"),
                Answering | AnswerSent | Connected => SignalAction::Ignore("duplicate offer"),
                Closed => SignalAction::Ignore("connection closed"),
            },
            SignalPayload::Answer { sdp } => match self.state {
                OfferSent if !self.answer_applied => {
                    self.answer_applied = true;
                    SignalAction::ApplyAnswer { answer_sdp: sdp }
                }
                OfferSent | Connected => SignalAction::Ignore("duplicate answer"),
                Closed => SignalAction::Ignore("connection closed"),
                _ => SignalAction::Ignore("answer without an outstanding offer"),
            },
            SignalPayload::Candidate { candidate } => match self.state {
                Closed => SignalAction::Ignore("connection closed"),
                _ => SignalAction::AddCandidate(candidate),
            },
        }
    }

    pub fn on_connection_state(&mut self, state: ConnectionState) -> StateOutcome {
        use SignalingState::*;

        match state {
            ConnectionState::Connected => match self.state {
                OfferSent | AnswerSent => {
                    self.state = Connected;
                    StateOutcome::Connected
                }
                Answering => {
                    self.connected_early = true;
                    StateOutcome::Unchanged
                }
                _ => StateOutcome::Unchanged,
            },
            ConnectionState::Failed | ConnectionState::Closed => {
                if self.state == Closed {
                    StateOutcome::Unchanged
                } else {
                    self.state = Closed;
                    StateOutcome::Failed
                }
            }
            ConnectionState::New | ConnectionState::Connecting | ConnectionState::Disconnected => {
                StateOutcome::Unchanged
            }
        }
    }
}

// ─── Negotiation steps ──────────────────────────────────────────────────────

/// Everything a negotiation task needs, captured by value so the task can
/// outlive the actor turn that started it.
#[derive(Clone)]
pub struct NegotiationPlan {
    pub peer_id: ParticipantId,
    pub transport: Arc<dyn Transport>,
    pub sink: PeerEventSink,
    /// Local streams the connection is seeded with (camera/mic, then screen).
    pub streams: Vec<MediaStream>,
    pub ice_timeout: Duration,
}

/// A connection with its local description ready to send.
pub struct Negotiated {
    pub handle: Arc<dyn PeerTransport>,
    pub local: SignalPayload,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated").field("local", &self.local.kind()).finish()
    }
}

/// Initiator path: connection + bundled offer.
pub async fn initiate(plan: NegotiationPlan) -> Result<Negotiated, TransportError> {
    let handle = open(&plan).await?;
    let steps = async {
        let offer = handle.create_offer().await?;
        bundled_description(handle.as_ref(), offer, plan.ice_timeout).await
    };
    match steps.await {
        Ok(sdp) => Ok(Negotiated {
            handle,
            local: SignalPayload::Offer { sdp },
        }),
        Err(e) => {
            handle.close().await;
            Err(e)
        }
    }
}

/// Responder path: connection + remote offer + bundled answer.
pub async fn respond(plan: NegotiationPlan, offer_sdp: String) -> Result<Negotiated, TransportError> {
    let handle = open(&plan).await?;
    let steps = async {
        handle
            .set_remote_description(SessionDescription::offer(offer_sdp))
            .await?;
        let answer = handle.create_answer().await?;
        bundled_description(handle.as_ref(), answer, plan.ice_timeout).await
    };
    match steps.await {
        Ok(sdp) => Ok(Negotiated {
            handle,
            local: SignalPayload::Answer { sdp },
        }),
        Err(e) => {
            handle.close().await;
            Err(e)
        }
    }
}

async fn open(plan: &NegotiationPlan) -> Result<Arc<dyn PeerTransport>, TransportError> {
    let handle = plan.transport.create_connection(plan.sink.clone()).await?;
    for stream in &plan.streams {
        if let Err(e) = handle.add_local_stream(stream).await {
            handle.close().await;
            return Err(e);
        }
    }
    debug!(peer_id = %plan.peer_id, streams = plan.streams.len(), "peer connection created");
    Ok(handle)
}

/// Set the local description, wait (bounded) for gathering and return the
/// description with whatever candidates were found.
async fn bundled_description(
    handle: &dyn PeerTransport,
    desc: SessionDescription,
    ice_timeout: Duration,
) -> Result<String, TransportError> {
    handle.set_local_description(desc).await?;
    handle.wait_ice_gathering(ice_timeout).await;
    handle
        .local_description()
        .await
        .map(|d| d.sdp)
        .ok_or(TransportError::NoLocalDescription)
}

// ─── Remote operations ──────────────────────────────────────────────────────

/// Remote input applied to an established handle.
#[derive(Debug, Clone)]
pub enum RemoteOp {
    Answer(String),
    Candidate(IceCandidate),
}

/// Spawn the task that applies remote ops to `handle` strictly in order.
/// Failures are reported through `sink` as transport errors.
pub fn spawn_remote_applier(
    handle: Arc<dyn PeerTransport>,
    sink: PeerEventSink,
) -> mpsc::UnboundedSender<RemoteOp> {
    let (tx, mut rx) = mpsc::unbounded_channel::<RemoteOp>();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let result = match op {
                RemoteOp::Answer(sdp) => {
                    handle
                        .set_remote_description(SessionDescription::answer(sdp))
                        .await
                }
                RemoteOp::Candidate(candidate) => handle.add_ice_candidate(candidate).await,
            };
            if let Err(e) = result {
                warn!(peer_id = %sink.peer_id(), "remote signal rejected by transport: {e}");
                sink.emit(TransportEvent::Error(e));
            }
        }
    });
    tx
}

// ─── Tests ──────────────────────────────────────────────────────────────────
