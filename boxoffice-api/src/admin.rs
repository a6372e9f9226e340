use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use boxoffice_core::catalog::ShowtimeListing;
use boxoffice_core::ledger::Availability;
use boxoffice_core::models::Order;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/showtimes/{id}", put(register_showtime))
        .route("/v1/admin/showtimes/{id}/close", post(close_showtime))
        .route("/v1/admin/reconciliation", get(list_reconciliation))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ShowtimeRequest {
    pub capacity: u32,
    pub unit_price: Decimal,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ShowtimeResponse {
    pub listing: ShowtimeListing,
    pub availability: Availability,
}

#[derive(Debug, Serialize)]
pub struct CloseShowtimeResponse {
    pub showtime_id: Uuid,
    pub closed_at: DateTime<Utc>,
    pub expired_tickets: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// PUT /v1/admin/showtimes/{id}
/// Register or update a showtime. Capacity may not drop below what is
/// already sold or held. A closed showtime stays closed.
async fn register_showtime(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ShowtimeRequest>,
) -> Result<Json<ShowtimeResponse>, AppError> {
    if req.unit_price.is_sign_negative() {
        return Err(AppError::Validation("unit_price must not be negative".into()));
    }
    if req.currency.trim().is_empty() {
        return Err(AppError::Validation("currency is required".into()));
    }

    let previous = state.catalog.get(id).await?;
    let listing = ShowtimeListing {
        id,
        capacity: req.capacity,
        unit_price: req.unit_price,
        currency: req.currency,
        starts_at: req.starts_at,
        closed_at: previous.as_ref().and_then(|l| l.closed_at),
    };
    state.catalog.upsert(&listing).await?;

    let availability = match state.ledger.set_capacity(id, req.capacity).await {
        Ok(availability) => availability,
        Err(e) => {
            // The listing must keep describing what the ledger enforces.
            if let Some(previous) = &previous {
                if let Err(restore_err) = state.catalog.upsert(previous).await {
                    tracing::error!(showtime_id = %id, error = %restore_err, "failed to restore showtime listing");
                }
            }
            return Err(e.into());
        }
    };

    tracing::info!(showtime_id = %id, capacity = req.capacity, "showtime registered");
    Ok(Json(ShowtimeResponse { listing, availability }))
}

/// POST /v1/admin/showtimes/{id}/close
/// The showtime is over: it stops selling and every ticket not yet used
/// becomes expired. Closing again re-runs the expiry.
async fn close_showtime(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CloseShowtimeResponse>, AppError> {
    let Some(mut listing) = state.catalog.get(id).await? else {
        return Err(AppError::NotFound(format!("Showtime not found: {id}")));
    };

    let closed_at = match listing.closed_at {
        Some(closed_at) => closed_at,
        None => {
            let now = state.clock.now();
            listing.closed_at = Some(now);
            state.catalog.upsert(&listing).await?;
            now
        }
    };

    let expired_tickets = state.tickets.expire_for_showtime(id).await?;
    tracing::info!(showtime_id = %id, expired_tickets, "showtime closed");

    Ok(Json(CloseShowtimeResponse {
        showtime_id: id,
        closed_at,
        expired_tickets,
    }))
}

/// GET /v1/admin/reconciliation
/// Orders paid too late to keep their seats, waiting on an operator.
async fn list_reconciliation(State(state): State<AppState>) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.flagged().await?))
}
