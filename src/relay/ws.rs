// WebSocket adapter for `serve_member`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{serve_member, RelayState};
use crate::protocol::{ClientMessage, ServerMessage};

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, client_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer: ends once the member has left and every sender is dropped.
    let writer = tokio::spawn(async move {
        while let Some(msg) = server_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!("failed to encode frame: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let member = tokio::spawn(serve_member(state, client_rx, server_tx, CancellationToken::new()));

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    if client_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("ignoring malformed client frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("websocket read error: {e}");
                break;
            }
        }
    }

    drop(client_tx);
    let _ = member.await;
    writer.abort();
    debug!("websocket connection closed");
}
