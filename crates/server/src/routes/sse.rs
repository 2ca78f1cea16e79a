use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1000;
pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub campaign_ids: Option<String>,
}

/// Recent envelopes kept for `Last-Event-ID` replay.
pub struct EventBuffer {
    events: VecDeque<events::EventEnvelope>,
    max_size: usize,
}

impl EventBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, envelope: events::EventEnvelope) {
        if self.events.len() >= self.max_size {
            self.events.pop_front();
        }
        self.events.push_back(envelope);
    }

    pub fn events_after(&self, event_id: Uuid) -> Vec<events::EventEnvelope> {
        self.events
            .iter()
            .skip_while(|envelope| envelope.id != event_id)
            .skip(1)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub type SharedEventBuffer = Arc<RwLock<EventBuffer>>;

fn parse_campaign_ids(campaign_ids: Option<&str>) -> Option<Vec<Uuid>> {
    campaign_ids.map(|s| {
        s.split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    })
}

fn matches_filter(envelope: &events::EventEnvelope, campaign_ids: Option<&[Uuid]>) -> bool {
    campaign_ids.map_or(true, |ids| ids.contains(&envelope.event.campaign_id()))
}

fn envelope_to_sse_event(envelope: &events::EventEnvelope) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(envelope.id.to_string())
        .event(envelope.event.name())
        .data(data))
}

/// Copy every published envelope into the replay buffer.
pub fn spawn_event_recorder(state: &AppState) -> tokio::task::JoinHandle<()> {
    let mut rx = state.event_bus.subscribe();
    let buffer = Arc::clone(&state.event_buffer);

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => buffer
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(envelope),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event recorder lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(
        ("campaign_ids" = Option<String>, Query, description = "Comma-separated campaign IDs to filter events"),
    ),
    responses(
        (status = 200, description = "SSE event stream"),
    ),
    tag = "events"
)]
pub async fn events_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: axum::http::HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let campaign_ids = parse_campaign_ids(query.campaign_ids.as_deref());
    let last_event_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<Uuid>().ok());

    let rx = state.event_bus.subscribe();

    let missed_events: Vec<_> = match last_event_id {
        Some(event_id) => state
            .event_buffer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .events_after(event_id)
            .into_iter()
            .filter(|e| matches_filter(e, campaign_ids.as_deref()))
            .collect(),
        None => vec![],
    };

    let missed_stream =
        futures::stream::iter(missed_events.into_iter().map(|e| envelope_to_sse_event(&e)));

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| {
        let campaign_ids = campaign_ids.clone();
        async move {
            match result {
                Ok(envelope) if matches_filter(&envelope, campaign_ids.as_deref()) => {
                    Some(envelope_to_sse_event(&envelope))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("SSE broadcast error: {:?}", e);
                    None
                }
            }
        }
    });

    Sse::new(missed_stream.chain(live_stream)).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[utoipa::path(
    get,
    path = "/api/campaigns/{id}/events",
    params(
        ("id" = Uuid, Path, description = "Campaign ID"),
    ),
    responses(
        (status = 200, description = "SSE stream of one campaign's events"),
        (status = 404, description = "Campaign not found"),
    ),
    tag = "events"
)]
pub async fn campaign_events_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let subscription = state.event_bus.subscribe_campaign(id);
    state.pipeline.get(id).await?;

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let envelope = subscription.recv().await?;
        Some((envelope_to_sse_event(&envelope), subscription))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
