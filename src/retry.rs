//! Retry logic for remote handshakes with error classification.

use anyhow::{Result, anyhow};
use log::{debug, warn};
use std::time::Duration;

/// Maximum number of attempts for an authentication handshake.
pub const MAX_RETRIES: usize = 3;

/// Delay between retry attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Errors that should not be retried.
#[derive(Debug)]
pub enum NonRetryableError {
    /// Credentials could not be used at all (for example an unparseable key).
    InvalidCredentials(String),
}

impl std::fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonRetryableError::InvalidCredentials(msg) => {
                write!(f, "Invalid credentials: {}", msg)
            }
        }
    }
}

impl std::error::Error for NonRetryableError {}

fn is_retryable_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<NonRetryableError>().is_none()
}

/// Run `operation` up to `max_attempts` times, sleeping `delay` between attempts.
///
/// A [`NonRetryableError`] anywhere at the top of the error stops the loop immediately.
pub fn with_retry<F, T>(
    operation_name: &str,
    max_attempts: usize,
    delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!("{}: non-retryable error: {}", operation_name, e);
                    return Err(e);
                }

                if attempt < max_attempts {
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                        operation_name,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("{}: failed after {} attempts", operation_name, max_attempts)))
}
