use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Retry policy for calls made before any output reached the client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    /// Fraction of the delay used as the jitter range (0.0 to 1.0).
    pub jitter_factor: f64,
    /// Upper bound for a single attempt. The remaining request deadline
    /// always applies as well.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.1,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is zero-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(base as u64).min(self.max_backoff);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let range = delay.as_millis() as f64 * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = rand::thread_rng().gen_range(-range..=range);
        Duration::from_millis((delay.as_millis() as f64 + jitter).max(0.0) as u64)
    }
}

/// Stand-in expiry for budgets too large to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Absolute time budget for one request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    expires_at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        let expires_at = started
            .checked_add(budget.min(FAR_FUTURE))
            .unwrap_or(started);
        Self {
            started,
            expires_at,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn instant(&self) -> Instant {
        self.expires_at
    }

    /// Timeout for the next attempt: the policy's bound, capped by what is
    /// left of the request.
    pub fn attempt_budget(&self, policy: &RetryPolicy) -> Duration {
        let remaining = self.remaining();
        policy
            .attempt_timeout
            .map_or(remaining, |timeout| timeout.min(remaining))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget or deadline runs out.
///
/// `op` receives the zero-based attempt number. Its future must resolve
/// before anything it produced is shown to the client; once it returns
/// `Ok`, later failures of that call are terminal and never come back here.
pub async fn retry_before_output<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: &Deadline,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let budget = deadline.attempt_budget(policy);
        if budget.is_zero() {
            return Err(Error::timeout(label, deadline.elapsed().as_millis() as u64));
        }

        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Aborted),
            outcome = tokio::time::timeout(budget, op(attempt)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(label, started.elapsed().as_millis() as u64)),
            },
        };

        let error = match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(label, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        attempt += 1;
        if !error.is_retryable() || attempt >= max_attempts || deadline.is_expired() {
            tracing::debug!(label, attempt, error = %error, "giving up");
            return Err(error);
        }

        let delay = policy.backoff(attempt - 1).min(deadline.remaining());
        tracing::warn!(
            label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying call"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_backoff(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn oversized_budget_does_not_overflow() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX / 2));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_jitter(false)
            .with_max_backoff(Duration::from_millis(3000));
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(3000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff(0);
            assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn attempt_budget_is_capped_by_deadline() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let policy = RetryPolicy::default().with_attempt_timeout(Duration::from_secs(10));
        assert!(deadline.attempt_budget(&policy) <= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let result = retry_before_output(
            &fast_policy(3),
            &deadline,
            &CancellationToken::new(),
            "test",
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::provider("test", "flaky"))
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_attempt_budget() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: Result<(), Error> = retry_before_output(
            &fast_policy(3),
            &deadline,
            &CancellationToken::new(),
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::provider("test", "down")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: Result<(), Error> = retry_before_output(
            &fast_policy(3),
            &deadline,
            &CancellationToken::new(),
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::provider_fatal("test", "bad request")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_timeout_maps_to_provider_timeout() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let policy = fast_policy(3).with_attempt_timeout(Duration::from_millis(10));
        let result: Result<(), Error> = retry_before_output(
            &policy,
            &deadline,
            &CancellationToken::new(),
            "slow",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending()
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), "ProviderTimeoutError");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_waiting_attempt() {
        let cancel = CancellationToken::new();
        let deadline = Deadline::after(Duration::from_secs(5));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), Error> =
            retry_before_output(&fast_policy(3), &deadline, &cancel, "test", |_| {
                std::future::pending()
            })
            .await;

        assert!(matches!(result, Err(Error::Aborted)));
    }
}
