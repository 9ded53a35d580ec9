//! Server-Sent Events stream of one conversation's events.
//!
//! A client first receives the conversation's backlog, then live events. Each
//! SSE message carries the event type as its name and the sequence number as
//! its id, so a reconnecting client can send `Last-Event-ID` and skip what it
//! already saw.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use conductor::events::{Envelope, EventBus};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

/// SSE endpoint handler: GET /stream/:id.
pub async fn events_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let resume_after = last_event_id(&headers);
    let stream = conversation_events(state.engine.bus().clone(), id, resume_after)
        .filter_map(|envelope| async move { to_sse(&envelope).map(Ok) });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Every event of one conversation with `seq > resume_after`, in order.
///
/// The receiver is taken together with the backlog, so nothing published in
/// between is lost. A receiver that lags refills the gap from the backlog.
fn conversation_events(
    bus: EventBus,
    id: String,
    resume_after: u64,
) -> impl Stream<Item = Envelope> {
    let (backlog, mut rx) = bus.subscribe_with_backlog(&id);
    debug!(
        conversation_id = %id,
        backlog = backlog.len(),
        resume_after,
        "sse client connected"
    );

    async_stream::stream! {
        let mut last_seq = resume_after;
        for envelope in backlog {
            if envelope.seq > last_seq {
                last_seq = envelope.seq;
                yield envelope;
            }
        }

        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if envelope.conversation_id != id || envelope.seq <= last_seq {
                        continue;
                    }
                    last_seq = envelope.seq;
                    yield envelope;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        conversation_id = %id,
                        skipped,
                        last_seq,
                        "sse client lagged, replaying backlog"
                    );
                    for envelope in bus.backlog(&id) {
                        if envelope.seq > last_seq {
                            last_seq = envelope.seq;
                            yield envelope;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    }
}

fn last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

fn event_name(envelope: &Envelope) -> Option<String> {
    let value = serde_json::to_value(&envelope.event).ok()?;
    value.get("type").and_then(Value::as_str).map(str::to_string)
}

fn to_sse(envelope: &Envelope) -> Option<Event> {
    let data = serde_json::to_string(envelope).ok()?;
    let name = event_name(envelope)?;
    Some(
        Event::default()
            .event(name)
            .id(envelope.seq.to_string())
            .data(data),
    )
}
