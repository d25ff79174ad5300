// src/relay_client.rs
//
// Persistent channel to the signaling relay.
//
// A `RelayConnector` yields a `RelayLink`: an outbound sender of
// `ClientMessage`s and an inbound receiver of `ServerMessage`s.  The inbound
// receiver closing is the only disconnect signal the session needs; the
// WebSocket implementation closes it when the socket ends for any reason.
//
// ────────────────────────────────────────────────────────────────────────────

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::protocol::{ClientMessage, ServerMessage};

// ─── Link & connector ───────────────────────────────────────────────────────

pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

impl RelayLink {
    /// Queue a frame.  Fails once the channel is gone.
    pub fn send(&self, msg: ClientMessage) -> Result<(), RelayError> {
        self.outbound.send(msg).map_err(|_| RelayError::Closed)
    }
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self) -> Result<RelayLink, RelayError>;
}

// ─── WebSocket implementation ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    url: String,
}

impl WsRelayConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    async fn connect(&self) -> Result<RelayLink, RelayError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RelayError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        info!(url = %self.url, "connected to relay");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

        // Writer: stops when every outbound sender is dropped.
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("failed to encode relay frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("relay write failed: {e}");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            debug!("relay writer finished");
        });

        // Reader: dropping `in_tx` is the disconnect signal.
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            debug!(kind = msg.kind(), "relay frame received");
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("ignoring malformed relay frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("relay read failed: {e}");
                        break;
                    }
                }
            }
            debug!("relay reader finished");
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ─── Reconnection ───────────────────────────────────────────────────────────

/// Exponential backoff for relay reconnection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Maximum delay cap (before jitter).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay for attempt `n` (0-indexed), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// `delay_for` scaled by a random factor in `[0.5, 1.5]`.
    pub fn jittered_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        self.delay_for(attempt).mul_f64(rng.gen_range(0.5..=1.5))
    }
}

/// Reconnect with backoff until a link is established, the attempts run out
/// or `cancel` fires.
pub async fn reconnect(
    connector: &dyn RelayConnector,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<RelayLink, RelayError> {
    for attempt in 0..policy.max_attempts {
        let delay = policy.jittered_delay(attempt, &mut rand::thread_rng());
        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to relay"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Closed),
            _ = tokio::time::sleep(delay) => {}
        }

        match connector.connect().await {
            Ok(link) => return Ok(link),
            Err(e) => warn!(attempt = attempt + 1, "relay reconnect failed: {e}"),
        }
    }

    warn!("relay reconnect exhausted all {} attempts", policy.max_attempts);
    Err(RelayError::Exhausted(policy.max_attempts))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
