use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use boxoffice_core::payment::{PaymentOutcome, PaymentStatus};
use boxoffice_order::OrderError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub order_id: Uuid,
    pub provider_reference: String,
    pub outcome: PaymentOutcome,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub order_id: Uuid,
    pub status: PaymentStatus,
    pub replayed: bool,
    pub tickets_issued: usize,
    pub flagged_for_reconciliation: bool,
}

/// POST /v1/webhooks/payments
/// Payment provider callback, delivered at least once.
///
/// A late payment against a reservation that already lapsed is acknowledged
/// with 202 so the provider stops redelivering; the order waits in the
/// reconciliation queue.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<(StatusCode, Json<WebhookAck>), AppError> {
    tracing::info!(
        order_id = %payload.order_id,
        provider_reference = %payload.provider_reference,
        outcome = ?payload.outcome,
        "Received payment webhook"
    );

    let result = match payload.outcome {
        PaymentOutcome::Succeeded => confirm(&state, &payload).await,
        PaymentOutcome::Failed => {
            let reason = payload.reason.as_deref().unwrap_or("payment declined");
            state
                .orders
                .fail_payment(payload.order_id, reason)
                .await
                .map(|order| {
                    (
                        StatusCode::OK,
                        Json(WebhookAck {
                            order_id: order.id,
                            status: order.payment_status,
                            replayed: false,
                            tickets_issued: 0,
                            flagged_for_reconciliation: false,
                        }),
                    )
                })
                .map_err(AppError::from)
        }
    };

    let label = match &result {
        Ok((status, _)) if *status == StatusCode::ACCEPTED => "flagged",
        Ok(_) => "processed",
        Err(_) => "rejected",
    };
    state.metrics.payments.with_label_values(&[label]).inc();
    result
}

async fn confirm(
    state: &AppState,
    payload: &PaymentWebhook,
) -> Result<(StatusCode, Json<WebhookAck>), AppError> {
    match state
        .orders
        .confirm_payment(payload.order_id, &payload.provider_reference)
        .await
    {
        Ok(confirmation) => Ok((
            StatusCode::OK,
            Json(WebhookAck {
                order_id: confirmation.order.id,
                status: confirmation.order.payment_status,
                replayed: confirmation.replayed,
                tickets_issued: confirmation.tickets.len(),
                flagged_for_reconciliation: false,
            }),
        )),
        Err(OrderError::ReservationConflict { order_id, .. }) => {
            let order = state.orders.get(order_id).await?;
            Ok((
                StatusCode::ACCEPTED,
                Json(WebhookAck {
                    order_id,
                    status: order.payment_status,
                    replayed: false,
                    tickets_issued: 0,
                    flagged_for_reconciliation: true,
                }),
            ))
        }
        Err(e) => Err(e.into()),
    }
}
