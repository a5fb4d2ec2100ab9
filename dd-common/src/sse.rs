//! Server-Sent Events (SSE) utilities

use crate::events::{DdEvent, EventBus};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Heartbeat interval for all SSE streams
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Create an SSE stream forwarding EventBus events
///
/// When `run_filter` is set only events of that run are forwarded.
/// Lagging subscribers skip the dropped events and keep streaming.
pub fn create_event_sse_stream(
    event_bus: &EventBus,
    run_filter: Option<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(run_filter = ?run_filter, "New SSE client connected");

    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            let event: DdEvent = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if let Some(run_id) = run_filter {
                if event.run_id() != Some(run_id) {
                    continue;
                }
            }

            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(json) => {
                    debug!("SSE: Broadcasting event: {}", event_type);
                    yield Ok(Event::default().event(event_type).data(json));
                }
                Err(e) => warn!("SSE: Failed to serialize event {}: {}", event_type, e),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
