//! Retry with exponential backoff and jitter, for wrapping whole reconciliation ticks.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = retry forever)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self { max_attempts: attempts, ..Default::default() }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is exhausted.
///
/// Returns the last error when giving up.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
                    return Err(e);
                }
                // 0.5x to 1.5x jitter
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let delay = Duration::from_secs_f64(config.delay_for(attempt).as_secs_f64() * jitter);
                warn!(operation = %operation_name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "attempt failed; retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
