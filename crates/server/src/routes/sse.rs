use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::AppState;

pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one session's events.
    pub session_id: Option<Uuid>,
}

fn event_name(event: &events::Event) -> &'static str {
    match event {
        events::Event::SessionStarted { .. } => "session.started",
        events::Event::StageStarted { .. } => "stage.started",
        events::Event::StageCompleted { .. } => "stage.completed",
        events::Event::SessionEnded { .. } => "session.ended",
        events::Event::Error { .. } => "error",
    }
}

fn envelope_to_sse_event(envelope: &events::EventEnvelope) -> Result<Event, Infallible> {
    let data = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(envelope.id.to_string())
        .event(event_name(&envelope.event))
        .data(data))
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(
        ("session_id" = Option<Uuid>, Query, description = "Only stream events for this session"),
    ),
    responses(
        (status = 200, description = "SSE stream of pipeline events"),
    ),
    tag = "events"
)]
pub async fn events_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let wanted = query.session_id;

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(envelope) => {
                if let Some(wanted) = wanted {
                    if envelope.event.session_id() != Some(wanted) {
                        return None;
                    }
                }
                Some(envelope_to_sse_event(&envelope))
            }
            Err(e) => {
                tracing::warn!("SSE broadcast error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
