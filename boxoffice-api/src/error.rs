use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boxoffice_core::ledger::LedgerError;
use boxoffice_core::repository::RepositoryError;
use boxoffice_order::{OrderError, ReservationError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Sold out: {0}")]
    SoldOut(String),
    /// The buyer has to start over with a new reservation.
    #[error("Reservation expired: {0}")]
    ReservationExpired(String),
    #[error("Conflict ({code}): {message}")]
    Conflict { code: &'static str, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Storage fault worth retrying.
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::SoldOut(msg) => (StatusCode::CONFLICT, "sold_out", msg),
            AppError::ReservationExpired(msg) => (StatusCode::GONE, "reservation_expired", msg),
            AppError::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::Unavailable(msg) => {
                tracing::warn!("Storage unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Temporarily unavailable, retry shortly".to_string(),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientInventory { .. } => AppError::SoldOut(err.to_string()),
            LedgerError::ShowtimeNotFound(_) => AppError::NotFound(err.to_string()),
            LedgerError::InvalidQuantity(_) => AppError::Validation(err.to_string()),
            LedgerError::CapacityBelowUsage { .. } => AppError::Conflict {
                code: "capacity_below_usage",
                message: err.to_string(),
            },
            LedgerError::Storage(_) => AppError::Unavailable(err.to_string()),
            LedgerError::UnknownHold(_) | LedgerError::HoldReleased(_) | LedgerError::HoldCommitted(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate(_) => AppError::Conflict {
                code: "duplicate",
                message: err.to_string(),
            },
            RepositoryError::Storage(_) => AppError::Unavailable(err.to_string()),
            RepositoryError::Corrupt(_) => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::Inventory(e) => e.into(),
            ReservationError::Repository(e) => e.into(),
            ReservationError::NotFound(_) => AppError::NotFound(err.to_string()),
            ReservationError::InvalidTtl(_) => AppError::Validation(err.to_string()),
            ReservationError::ShowtimeClosed(_) => AppError::Conflict {
                code: "showtime_closed",
                message: err.to_string(),
            },
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let conflict = |code: &'static str, err: &OrderError| AppError::Conflict {
            code,
            message: err.to_string(),
        };
        match err {
            OrderError::Ledger(e) => e.into(),
            OrderError::Repository(e) => e.into(),
            OrderError::Issuance(ref e) if e.is_transient() => AppError::Unavailable(err.to_string()),
            OrderError::Issuance(_) => AppError::InternalServerError(err.to_string()),
            OrderError::NotFound(_) | OrderError::ShowtimeNotListed(_) => AppError::NotFound(err.to_string()),
            OrderError::ReservationExpiredOrMissing(_) => AppError::ReservationExpired(err.to_string()),
            OrderError::Validation(_) => AppError::Validation(err.to_string()),
            OrderError::InvalidStateTransition { .. } => conflict("invalid_state_transition", &err),
            OrderError::ReservationAlreadyOrdered(_) => conflict("reservation_already_ordered", &err),
            OrderError::ShowtimeClosed(_) => conflict("showtime_closed", &err),
            OrderError::ReservationConflict { .. } => conflict("reservation_conflict", &err),
            OrderError::ConflictingOutcome { .. } => conflict("conflicting_outcome", &err),
            OrderError::PaymentReferenceMismatch { .. } => conflict("payment_reference_mismatch", &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_sold_out_and_expiry_map_to_distinct_statuses() {
        let sold_out: AppError = LedgerError::InsufficientInventory {
            showtime_id: Uuid::nil(),
            requested: 2,
            available: 0,
        }
        .into();
        assert_eq!(sold_out.into_response().status(), StatusCode::CONFLICT);

        let expired: AppError = OrderError::ReservationExpiredOrMissing(Uuid::nil()).into();
        assert_eq!(expired.into_response().status(), StatusCode::GONE);

        let transient: AppError = RepositoryError::Storage("pool timed out".into()).into();
        assert_eq!(transient.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
