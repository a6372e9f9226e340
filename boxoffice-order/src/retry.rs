use boxoffice_core::ledger::LedgerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(25);

/// Retry a ledger call while it fails with a transient storage error.
/// Definitive answers (sold out, unknown hold, ...) are returned immediately.
pub(crate) async fn with_backoff<T, F, Fut>(operation: &str, mut call: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < ATTEMPTS => {
                let delay = BASE_DELAY * 2u32.pow(attempt - 1);
                warn!(operation, attempt, error = %e, "transient ledger failure, retrying in {:?}", delay);
                sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
