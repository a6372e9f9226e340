use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::AppError;
use crate::state::AppState;

/// Counters exported at `/metrics`.
pub struct EngineMetrics {
    registry: Registry,
    pub hold_attempts: IntCounterVec,
    pub scans: IntCounterVec,
    pub payments: IntCounterVec,
    pub reservations_expired: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let hold_attempts = IntCounterVec::new(
            Opts::new("boxoffice_hold_attempts_total", "Reservation attempts by outcome"),
            &["outcome"],
        )?;
        let scans = IntCounterVec::new(
            Opts::new("boxoffice_scans_total", "Ticket scans by outcome"),
            &["outcome"],
        )?;
        let payments = IntCounterVec::new(
            Opts::new("boxoffice_payment_callbacks_total", "Payment callbacks by result"),
            &["result"],
        )?;
        let reservations_expired = IntCounter::new(
            "boxoffice_reservations_expired_total",
            "Reservations expired by the sweep",
        )?;

        registry.register(Box::new(hold_attempts.clone()))?;
        registry.register(Box::new(scans.clone()))?;
        registry.register(Box::new(payments.clone()))?;
        registry.register(Box::new(reservations_expired.clone()))?;

        Ok(Self {
            registry,
            hold_attempts,
            scans,
            payments,
            reservations_expired,
        })
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(export))
}

async fn export(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render().map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
