use boxoffice_order::SweepReport;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::state::AppState;

/// Expire lapsed reservations every `period` until the runtime shuts down.
pub async fn start_expiry_worker(state: AppState, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry worker started, sweeping every {:?}", period);

    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

/// One sweep pass. Failures are logged; the next tick tries again.
pub async fn sweep_once(state: &AppState) -> Option<SweepReport> {
    match state.reservations.expire_sweep().await {
        Ok(report) => {
            state.metrics.reservations_expired.inc_by(report.expired as u64);
            Some(report)
        }
        Err(e) => {
            error!("Expiry sweep failed: {}", e);
            None
        }
    }
}
