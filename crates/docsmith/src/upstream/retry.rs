use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::UpstreamError;
use crate::config::RetrySettings;

/// Delay before retry number `attempt` (1-based): doubling from the base
/// delay, capped at the maximum.
pub fn backoff_delay(settings: RetrySettings, attempt: u32) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    let millis = settings
        .base_delay_ms
        .saturating_mul(factor)
        .min(settings.max_delay_ms);
    Duration::from_millis(millis)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up.
pub async fn with_backoff<T, F, Fut>(
    settings: RetrySettings,
    operation: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(settings, attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upstream call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
