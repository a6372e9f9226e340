use axum::{extract::State, routing::post, Json, Router};
use boxoffice_order::ScanResult;
use boxoffice_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/scans", post(scan_ticket))
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub code: Masked<String>,
    /// Showtime the gate admits to, when the scanner knows it.
    pub showtime_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub admitted: bool,
    pub message: String,
    #[serde(flatten)]
    pub result: ScanResult,
}

/// POST /v1/scans
/// Every outcome is a 200; rejection is reported in the body.
async fn scan_ticket(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    let result = state.validator.scan(req.code.expose(), req.showtime_id).await?;
    state.metrics.scans.with_label_values(&[result.label()]).inc();

    Ok(Json(ScanResponse {
        admitted: result.is_admitted(),
        message: result.operator_message(),
        result,
    }))
}
