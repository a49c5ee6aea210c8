use std::future::Future;

use crate::{BusError, Result, RetryPolicy};

/// Runs `connect` until it succeeds or the policy runs out of attempts.
///
/// Waits `policy.delay_after(attempt)` between attempts. Exhaustion yields
/// [`BusError::ConnectRetriesExhausted`] carrying the last error.
pub async fn connect_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: &str,
    mut connect: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect().await {
            Ok(connection) => {
                if attempt > 1 {
                    tracing::info!(endpoint, attempt, "Connected after retry");
                }
                return Ok(connection);
            }
            Err(err) if policy.can_retry(attempt) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(endpoint, attempt, error = %err, "Giving up on connection");
                return Err(BusError::ConnectRetriesExhausted {
                    endpoint: endpoint.to_string(),
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
        }
    }
}
