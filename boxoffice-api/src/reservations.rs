use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use boxoffice_core::ledger::LedgerError;
use boxoffice_core::models::{Reservation, ReservationState};
use boxoffice_order::ReservationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reservations", post(create_reservation))
        .route("/v1/reservations/{id}", get(get_reservation))
}

#[derive(Debug, Deserialize)]
pub struct ReservationRequest {
    pub showtime_id: Uuid,
    pub quantity: u32,
    /// Overrides the configured hold duration.
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
    pub state: ReservationState,
    pub expires_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            showtime_id: r.showtime_id,
            quantity: r.quantity,
            state: r.state,
            expires_at: r.expires_at,
        }
    }
}

/// POST /v1/reservations
async fn create_reservation(
    State(state): State<AppState>,
    Json(req): Json<ReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), AppError> {
    let result = match requested_ttl(req.ttl_seconds) {
        Ok(ttl) => state.reservations.reserve(req.showtime_id, req.quantity, ttl).await,
        Err(e) => Err(e),
    };

    let outcome = match &result {
        Ok(_) => "granted",
        Err(ReservationError::Inventory(LedgerError::InsufficientInventory { .. })) => "sold_out",
        Err(_) => "rejected",
    };
    state.metrics.hold_attempts.with_label_values(&[outcome]).inc();

    let reservation = result?;
    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// Seconds beyond chrono's range are refused here rather than panicking.
fn requested_ttl(ttl_seconds: Option<i64>) -> Result<Option<chrono::Duration>, ReservationError> {
    ttl_seconds
        .map(|secs| chrono::Duration::try_seconds(secs).ok_or(ReservationError::InvalidTtl(secs)))
        .transpose()
}

/// GET /v1/reservations/{id}
async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state.reservations.get(id).await?;
    Ok(Json(reservation.into()))
}
