//! `GET /v1/events?room_id=<room>&types=<a,b>`: relay events as Server-Sent
//! Events.  Frames carry `event: <type>`, `id: <evt_...>` and the JSON
//! envelope as data.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::events::{EventType, RelayEvent};
use super::RelayState;

#[derive(Debug, Default, Deserialize)]
pub struct SseQuery {
    pub room_id: Option<String>,
    /// Comma-separated, e.g. "participant.joined,room.closed".
    pub types: Option<String>,
}

/// Parsed form of [`SseQuery`].  Unknown type names are dropped; a `types`
/// list with nothing recognisable means no type filter.
#[derive(Debug, Default)]
struct EventFilter {
    room_id: Option<String>,
    types: Vec<EventType>,
}

impl From<SseQuery> for EventFilter {
    fn from(query: SseQuery) -> Self {
        let types = query
            .types
            .as_deref()
            .map(|s| s.split(',').filter_map(EventType::parse).collect())
            .unwrap_or_default();
        Self {
            room_id: query.room_id,
            types,
        }
    }
}

impl EventFilter {
    fn accepts(&self, event: &RelayEvent) -> bool {
        let room_ok = self.room_id.as_deref().map_or(true, |r| r == event.room_id());
        let type_ok = self.types.is_empty() || self.types.contains(&event.event_type);
        room_ok && type_ok
    }

    fn frame(event: &RelayEvent) -> Option<SseEvent> {
        match serde_json::to_string(event) {
            Ok(json) => Some(
                SseEvent::default()
                    .event(event.event_type.as_str())
                    .id(event.id.clone())
                    .data(json),
            ),
            Err(e) => {
                warn!(event_id = %event.id, "unserializable relay event: {e}");
                None
            }
        }
    }
}

pub async fn sse_events(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<SseQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.events.subscribe();
    info!(
        room_id = query.room_id.as_deref().unwrap_or("*"),
        types = query.types.as_deref().unwrap_or("*"),
        "event stream opened"
    );
    let filter = EventFilter::from(query);

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) if filter.accepts(&event) => {
                    if let Some(frame) = EventFilter::frame(&event) {
                        yield Ok(frame);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event stream subscriber lagged");
                    yield Ok(SseEvent::default()
                        .event("_warning")
                        .data(serde_json::json!({ "skipped": n }).to_string()));
                }
                Err(RecvError::Closed) => {
                    debug!("event bus closed");
                    break;
                }
            }
        }
    };

    // Heartbeat comments keep idle proxies from dropping the stream.
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
