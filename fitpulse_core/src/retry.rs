//! Retry executor with bounded exponential backoff.
//!
//! Wraps any retryable-or-idempotent remote operation and re-runs it until
//! success, a non-retryable error, or the attempt budget is exhausted.
//! Server-suggested retry-after delays take precedence over computed backoff.

use crate::config::RetrySettings;
use crate::{RetryClass, StoreResult};
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first (1 = no retries)
    pub max_attempts: u32,
    /// Delay before the first retry, pre-jitter
    pub base_delay: Duration,
    /// Cap applied to computed delays and server hints
    pub max_delay: Duration,
    /// Backoff growth factor per attempt
    pub multiplier: f64,
    /// Proportional jitter: delay is scaled by a random value in
    /// `[1-jitter, 1+jitter]` to avoid synchronized retries
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// More attempts and a shorter base delay, for user-visible writes
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 1.5,
            jitter: 0.1,
        }
    }

    /// Fewer attempts and a longer base delay, for background reads
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Build from the loaded configuration file
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter: 0.1,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// A server-suggested retry-after wins over computed backoff but is still
    /// capped at `max_delay`. Computed backoff is
    /// `base × multiplier^(attempt−1)`, capped, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint {
            return hint.min(self.max_delay);
        }

        let exp = self.multiplier.powi(attempt.saturating_sub(1).min(30) as i32);
        let raw_ms = (self.base_delay.as_millis() as f64) * exp;
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let jittered_ms = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            capped_ms * factor
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// Cumulative retry diagnostics, exposed read-only for dashboards
#[derive(Clone, Debug, Default)]
pub struct RetryMetrics {
    /// Total attempts across all operations
    pub attempts: u64,
    /// Operations that succeeded after at least one retry
    pub recovered: u64,
    /// Operations that surfaced a terminal failure
    pub failures: u64,
    /// Failure counts by error kind
    pub errors_by_kind: HashMap<&'static str, u64>,
}

/// Executes remote operations with bounded exponential backoff
#[derive(Default)]
pub struct RetryExecutor {
    metrics: Mutex<RetryMetrics>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of cumulative metrics
    pub fn metrics(&self) -> RetryMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Run `operation` until success, a non-retryable error, or
    /// `config.max_attempts` attempts.
    ///
    /// The final error is surfaced unchanged; callers decide whether to map
    /// it into [`crate::Error::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        name: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.metrics.lock().unwrap().attempts += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        let mut metrics = self.metrics.lock().unwrap();
                        metrics.recovered += 1;
                        drop(metrics);
                        tracing::info!(
                            "'{}' succeeded on attempt {}/{}",
                            name,
                            attempt,
                            config.max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            {
                let mut metrics = self.metrics.lock().unwrap();
                *metrics.errors_by_kind.entry(error.kind.as_str()).or_insert(0) += 1;
            }

            match error.retry_class() {
                RetryClass::Bug => {
                    // Caller-side logic produced a malformed request; retrying
                    // would fail identically, and someone needs to see this
                    tracing::error!("'{}' sent a malformed request: {}", name, error);
                    self.metrics.lock().unwrap().failures += 1;
                    return Err(error);
                }
                RetryClass::Fatal => {
                    tracing::warn!("'{}' failed terminally: {}", name, error);
                    self.metrics.lock().unwrap().failures += 1;
                    return Err(error);
                }
                RetryClass::Retryable => {
                    if attempt >= config.max_attempts {
                        tracing::warn!(
                            "'{}' exhausted {} attempts, surfacing: {}",
                            name,
                            config.max_attempts,
                            error
                        );
                        self.metrics.lock().unwrap().failures += 1;
                        return Err(error);
                    }

                    let delay = config.delay_for_attempt(attempt, error.retry_after);
                    tracing::debug!(
                        "'{}' attempt {}/{} failed ({}), retrying in {:?}",
                        name,
                        attempt,
                        config.max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
