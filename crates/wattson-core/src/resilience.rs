//! Timeouts, bounded retries and the shared collaborator limiter
//!
//! Calls to collaborators are the only operations in the pipeline that may
//! suspend. Each one goes through [`with_retry`]: every attempt is bounded
//! by a timeout and failures back off exponentially up to
//! `max_attempts`. Diagnostic collaborators additionally share one
//! [`ServiceLimiter`] so the aggregate fan-out of a cycle stays under a
//! single ceiling.

use crate::error::{Result, WattsonError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Retry and timeout policy for one collaborator call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub call_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        self.backoff_base.mul_f64(factor)
    }
}

/// Run `op` under the policy's timeout, retrying retryable failures.
///
/// Non-retryable errors surface immediately. After the last attempt the
/// final error is returned unchanged.
pub async fn with_retry<T, F, Fut>(service: &str, policy: &RetryPolicy, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_attempts(service, policy, None, op).await
}

/// Retry loop shared by [`with_retry`] and [`ServiceLimiter::call`]
///
/// A limiter permit is taken before the attempt's timeout starts and held
/// until the attempt ends, so queueing never counts against the call.
async fn run_attempts<T, F, Fut>(
    service: &str,
    policy: &RetryPolicy,
    limiter: Option<&ServiceLimiter>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let permit = match limiter {
            Some(limiter) => Some(limiter.acquire().await?),
            None => None,
        };
        let outcome = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(WattsonError::Timeout {
                service: service.to_string(),
                after_ms: policy.call_timeout.as_millis() as u64,
            }),
        };
        drop(permit);

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                if attempt > 1 {
                    tracing::warn!(
                        service,
                        attempts = attempt,
                        "Giving up on {}: {}",
                        service,
                        e
                    );
                }
                return Err(e);
            }
            Err(e) => {
                let backoff = policy.backoff_after(attempt);
                tracing::warn!(
                    "{} call failed (attempt {}/{}), retrying in {:?}: {}",
                    service,
                    attempt,
                    max_attempts,
                    backoff,
                    e
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Shared concurrency ceiling for rate-limited collaborators
#[derive(Debug, Clone)]
pub struct ServiceLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ServiceLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| WattsonError::Invariant(format!("Service limiter closed: {}", e)))
    }

    /// [`with_retry`] where every attempt holds a limiter permit
    ///
    /// The timeout covers the call itself, not the wait for a permit.
    pub async fn call<T, F, Fut>(&self, service: &str, policy: &RetryPolicy, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        run_attempts(service, policy, Some(self), op).await
    }
}
