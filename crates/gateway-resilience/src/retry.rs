//! Retry policy with exponential backoff.
//!
//! Retries retryable failures with jittered exponential backoff. The whole
//! retried call, sleeps included, is bounded by a single overall timeout.

use chrono::{DateTime, Utc};
use gateway_core::{CorrelationId, ErrorKind, GatewayError, GatewayResult, ProviderErrorType};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Error signatures that are worth retrying
#[derive(Debug, Clone)]
pub struct RetryableErrors {
    /// Canonical kinds that are always retried
    pub kinds: HashSet<ErrorKind>,
    /// Upstream HTTP statuses retried for provider errors
    pub status_codes: HashSet<u16>,
    /// Provider error subtypes retried regardless of status
    pub provider_error_types: Vec<ProviderErrorType>,
}

impl Default for RetryableErrors {
    fn default() -> Self {
        Self {
            kinds: [
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::RateLimit,
                ErrorKind::ServiceUnavailable,
            ]
            .into_iter()
            .collect(),
            status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            provider_error_types: vec![ProviderErrorType::Overloaded],
        }
    }
}

impl RetryableErrors {
    /// Whether `error` matches a retryable signature.
    ///
    /// A breaker rejection is never retryable.
    #[must_use]
    pub fn matches(&self, error: &GatewayError) -> bool {
        match error {
            GatewayError::CircuitBreakerOpen { .. } => false,
            GatewayError::Provider {
                error_type, status, ..
            } => {
                self.provider_error_types.contains(error_type)
                    || status.is_some_and(|s| self.status_codes.contains(&s))
            }
            other => self.kinds.contains(&other.kind()),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0), applied as +/- a fraction of the delay
    pub jitter_factor: f64,
    /// Bound on the whole retried call
    pub timeout: Duration,
    /// What to retry
    pub retryable: RetryableErrors,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            timeout: Duration::from_secs(120),
            retryable: RetryableErrors::default(),
        }
    }
}

/// Identifies a retried call in logs
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// Correlation id of the inbound request
    pub correlation_id: &'a CorrelationId,
    /// Operation name (`create_response`, `create_response_stream`)
    pub operation: &'a str,
    /// Upstream provider id
    pub provider: &'a str,
}

/// Outcome of a single attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt succeeded
    Success,
    /// The attempt failed
    Failure {
        /// Canonical kind of the failure
        kind: ErrorKind,
        /// Error message
        message: String,
    },
}

/// Record of one attempt
#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// What happened
    pub outcome: AttemptOutcome,
    /// Backoff slept before the next attempt, if one followed
    pub delay_before_next: Option<Duration>,
}

/// Result of a retried call
#[derive(Debug)]
pub struct RetryResult<T> {
    /// Final result
    pub result: GatewayResult<T>,
    /// Every attempt made, in order
    pub attempts: Vec<RetryAttempt>,
    /// Wall time of the whole call, sleeps included
    pub total_duration: Duration,
    /// Whether the overall timeout cut the call off
    pub deadline_exceeded: bool,
}

impl<T> RetryResult<T> {
    /// Number of attempts made
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Whether the call eventually succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Convert to a Result
    ///
    /// # Errors
    /// Returns the final error if the call failed
    pub fn into_result(self) -> GatewayResult<T> {
        self.result
    }
}

/// Aggregate counters across every call made through a policy
#[derive(Debug, Default)]
pub struct RetryMetrics {
    calls: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Snapshot of [`RetryMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryMetricsSnapshot {
    /// Calls made
    pub calls: u64,
    /// Attempts made
    pub attempts: u64,
    /// Attempts after the first
    pub retries: u64,
    /// Calls that succeeded
    pub successes: u64,
    /// Calls that failed
    pub failures: u64,
    /// Calls cut off by the overall timeout
    pub timeouts: u64,
}

impl RetryMetrics {
    /// Take a snapshot
    #[must_use]
    pub fn snapshot(&self) -> RetryMetricsSnapshot {
        RetryMetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Retry policy implementation
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: RetryMetrics,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: RetryMetrics::default(),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Policy that makes exactly one attempt
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        })
    }

    /// Backoff before the attempt following failed attempt `attempt` (1-based).
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt-1))`, then +/- `jitter_factor`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base = self.config.base_delay.as_secs_f64();
        let delay = (base * self.config.backoff_multiplier.powi(exponent))
            .min(self.config.max_delay.as_secs_f64());

        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };

        Duration::from_secs_f64((delay * factor).max(0.0))
    }

    /// Check if an error is retryable
    #[must_use]
    pub fn is_retryable(&self, error: &GatewayError) -> bool {
        self.config.retryable.matches(error)
    }

    /// Execute an operation with retry logic.
    ///
    /// The result carries every attempt. If the overall timeout elapses the
    /// in-flight attempt is abandoned and the call fails with
    /// [`GatewayError::Timeout`].
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        context: RetryContext<'_>,
    ) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let start = Instant::now();
        let mut attempts = Vec::new();
        self.metrics.calls.fetch_add(1, Ordering::Relaxed);

        let bounded = tokio::time::timeout(
            self.config.timeout,
            self.run_attempts(&mut operation, context, &mut attempts),
        )
        .await;

        let deadline_exceeded = bounded.is_err();
        let result = match bounded {
            Ok(result) => result,
            Err(_) => {
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                let error = GatewayError::timeout(self.config.timeout);
                if attempts
                    .last()
                    .map_or(true, |a: &RetryAttempt| a.delay_before_next.is_some())
                {
                    attempts.push(RetryAttempt {
                        attempt: u32::try_from(attempts.len() + 1).unwrap_or(u32::MAX),
                        started_at: Utc::now(),
                        outcome: AttemptOutcome::Failure {
                            kind: ErrorKind::Timeout,
                            message: error.to_string(),
                        },
                        delay_before_next: None,
                    });
                }
                warn!(
                    correlation_id = %context.correlation_id,
                    provider = %context.provider,
                    operation = context.operation,
                    timeout_ms = self.config.timeout.as_millis(),
                    "Retried call exceeded overall timeout"
                );
                Err(error)
            }
        };

        if result.is_ok() {
            self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        }

        RetryResult {
            result,
            attempts,
            total_duration: start.elapsed(),
            deadline_exceeded,
        }
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        operation: &mut F,
        context: RetryContext<'_>,
        attempts: &mut Vec<RetryAttempt>,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
            if attempt > 1 {
                self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            }
            let started_at = Utc::now();

            match operation().await {
                Ok(value) => {
                    attempts.push(RetryAttempt {
                        attempt,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        delay_before_next: None,
                    });
                    if attempt > 1 {
                        debug!(
                            correlation_id = %context.correlation_id,
                            provider = %context.provider,
                            attempt = attempt,
                            "Retry succeeded"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let retry = attempt < max_attempts && self.is_retryable(&error);
                    let delay = retry.then(|| self.delay_for_attempt(attempt));

                    attempts.push(RetryAttempt {
                        attempt,
                        started_at,
                        outcome: AttemptOutcome::Failure {
                            kind: error.kind(),
                            message: error.to_string(),
                        },
                        delay_before_next: delay,
                    });

                    let Some(delay) = delay else {
                        return Err(error);
                    };

                    warn!(
                        correlation_id = %context.correlation_id,
                        provider = %context.provider,
                        operation = context.operation,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Retrying after error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Aggregate metrics
    #[must_use]
    pub fn metrics(&self) -> RetryMetricsSnapshot {
        self.metrics.snapshot()
    }
}
