use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use boxoffice_core::models::{Buyer, Order, Ticket};
use boxoffice_order::{NewOrder, RefundSummary};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/tickets", get(list_tickets))
        .route("/v1/orders/{id}/refund", post(refund_order))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub reservation_id: Uuid,
    pub buyer: Buyer,
    /// Total shown at checkout; the order is refused if the price moved since.
    pub expected_total: Option<Decimal>,
    pub payment_method: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state
        .orders
        .create(NewOrder {
            reservation_id: req.reservation_id,
            buyer: req.buyer,
            expected_total: req.expected_total,
            payment_method: req.payment_method,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders/{id}
async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get(id).await?))
}

/// GET /v1/orders/{id}/tickets
/// Operational view; the response carries scannable codes.
async fn list_tickets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.orders.tickets(id).await?))
}

/// POST /v1/orders/{id}/refund
async fn refund_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefundSummary>, AppError> {
    Ok(Json(state.orders.refund(id).await?))
}
