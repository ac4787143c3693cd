//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use crate::types::RetryConfig;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Send + Sync {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay_ms` - Milliseconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay_ms: u64);
}

/// Callback that logs retries for one resource.
pub struct LogCallback<'a> {
    pub label: &'a str,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay_ms: u64) {
        log::warn!(
            "{}: attempt {}/{} failed: {}. Retrying in {}ms",
            self.label,
            attempt,
            max_attempts,
            error,
            delay_ms
        );
    }
}

/// Execute a provider call with retry logic.
///
/// Transient and rate-limited errors are retried with exponential backoff;
/// anything else is returned immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, max_attempts, &e, delay.as_millis() as u64);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
