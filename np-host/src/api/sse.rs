//! Server-Sent Events stream of host events

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every host event: engine status and log lines, session changes,
/// playback stop and native drag requests, cleanup results.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    np_common::sse::event_bus_sse_stream(&state.event_bus, "np-host")
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
