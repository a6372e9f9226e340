use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use boxoffice_core::ledger::Availability;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/showtimes/{id}/availability", get(get_availability))
        .route("/v1/showtimes/{id}/stream", get(stream_availability))
}

/// GET /v1/showtimes/{id}/availability
async fn get_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.ledger.availability(id).await?))
}

#[derive(Debug, Serialize)]
struct AvailabilityUpdate {
    cause: &'static str,
    #[serde(flatten)]
    availability: Availability,
}

/// GET /v1/showtimes/{id}/stream
/// Pushes a fresh availability snapshot whenever an event touches the showtime.
async fn stream_availability(
    State(state): State<AppState>,
    Path(showtime_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sse_tx.subscribe();
    let ledger = state.ledger.clone();

    let stream = BroadcastStream::new(rx).filter_map(move |message| {
        let ledger = ledger.clone();
        async move {
            // Lagged receivers skip ahead; the next snapshot is complete anyway.
            let event = message.ok()?;
            if event.showtime_id() != Some(showtime_id) {
                return None;
            }
            let availability = ledger.availability(showtime_id).await.ok()?;
            let update = AvailabilityUpdate {
                cause: event.name(),
                availability,
            };
            let data = serde_json::to_string(&update).ok()?;
            Some(Ok(Event::default().event("availability").data(data)))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
