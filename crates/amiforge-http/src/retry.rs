//! Bounded retry.

use std::fmt::Display;
use std::future::Future;

use tracing::warn;

/// Run `op` up to `max_attempts` times, returning the first success.
///
/// Attempts follow each other immediately. Every failure is logged with its
/// attempt number; the error of the last attempt is returned. The closure
/// receives the 1-based attempt number.
pub async fn with_retries<T, E, F, Fut>(max_attempts: u32, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(operation = %label, attempt, error = %err, "{label} failed {attempt} times");
                if attempt >= max_attempts {
                    return Err(err);
                }
                attempt += 1;
            }
        }
    }
}
