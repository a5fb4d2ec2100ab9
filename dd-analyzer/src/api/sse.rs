//! Server-Sent Events for pipeline progress

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventStreamParams {
    /// Only forward events of this run
    pub run_id: Option<Uuid>,
}

/// GET /events?run_id
///
/// Streams every `DdEvent` (ingest, run lifecycle, stage progress) with
/// 15 s heartbeats.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(params): Query<EventStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    dd_common::sse::create_event_sse_stream(&state.event_bus, params.run_id)
}

pub fn sse_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
