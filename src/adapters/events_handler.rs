//! GET /events — live Server-Sent Events feed off the event bus

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;

use super::AppState;
use crate::collab::EventFilter;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

/// Attach a live subscription. Events published before the subscription are
/// not replayed; a slow consumer silently loses its oldest backlog.
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let mut filter = EventFilter::new();
    if let Some(slot) = &query.slot {
        filter = filter.slot(slot);
    }
    if let Some(session) = &query.session {
        filter = filter.session(session);
    }

    let mut subscription = state
        .bus
        .subscribe(filter)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            yield Ok(Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{}")));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
