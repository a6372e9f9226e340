use anyhow::Context;
use boxoffice_api::{app, worker, AppState, EngineSettings};
use boxoffice_core::clock::SystemClock;
use boxoffice_store::{Config, Storage};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Box Office API on port {}", config.server.port);

    let storage = Storage::open(&config).await.context("Failed to open storage")?;
    let app_state = AppState::build(storage, EngineSettings::from_config(&config), Arc::new(SystemClock))
        .context("Failed to register metrics")?;

    tokio::spawn(worker::start_expiry_worker(app_state.clone(), config.sweep_interval()));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
