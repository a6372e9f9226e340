use axum::{http::Method, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod error;
pub mod metrics;
pub mod orders;
pub mod reservations;
pub mod scans;
pub mod showtimes;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::{AppState, EngineSettings};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::USER_AGENT]);

    Router::new()
        .merge(admin::routes())
        .merge(showtimes::routes())
        .merge(reservations::routes())
        .merge(orders::routes())
        .merge(webhooks::routes())
        .merge(scans::routes())
        .merge(metrics::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
