//! # Rate-Limited Call Gateway
//!
//! ## Purpose
//! Wraps every outbound backend call behind a bounded worker pool, a
//! request-rate ceiling over a rolling 60-second window, a per-call timeout,
//! and a retry policy with exponential backoff. Each backend gets its own
//! gate so a slow heavy-analysis backend never starves the fast filter
//! backend.
//!
//! ## Guarantees
//! - At most `max_concurrent` calls in flight per gate
//! - At most `requests_per_minute` dispatches in any rolling 60-second window
//! - Requests past the ceiling queue and release in submission order; none
//!   are dropped
//! - Only transient failures are retried; permanent failures surface
//!   immediately as a terminal per-item error

use crate::config::{BackendConfig, RetryConfig};
use crate::errors::{DigestError, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Rolling 60-second window length.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Retry policy: an explicit, independently testable value injected into
/// the gate rather than inlined at call sites.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Backoff for the first retry; doubles each further retry
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Upper bound of uniform random jitter added to each backoff
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Backoff before the retry following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            exponential
        } else {
            use rand::Rng;
            exponential + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        }
    }
}

/// Dispatch timestamps inside the current rolling window.
struct RollingWindow {
    capacity: u32,
    stamps: VecDeque<Instant>,
}

impl RollingWindow {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            stamps: VecDeque::new(),
        }
    }

    /// Try to claim a dispatch slot at `now`. On success the slot is
    /// recorded; on failure returns how long to wait for the oldest stamp
    /// to leave the window. Capacity 0 means unlimited.
    fn try_admit(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        if self.capacity == 0 {
            return Ok(());
        }

        while let Some(front) = self.stamps.front() {
            if now.duration_since(*front) >= RATE_WINDOW {
                self.stamps.pop_front();
            } else {
                break;
            }
        }

        if (self.stamps.len() as u32) < self.capacity {
            self.stamps.push_back(now);
            Ok(())
        } else {
            let oldest = *self.stamps.front().expect("non-empty window");
            Err(RATE_WINDOW - now.duration_since(oldest))
        }
    }
}

/// One backend's gate: concurrency bound + rate window + timeout + retry.
pub struct CallGate {
    name: String,
    permits: Arc<Semaphore>,
    /// Fair FIFO admission through the rate window
    turnstile: tokio::sync::Mutex<()>,
    window: parking_lot::Mutex<RollingWindow>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CallGate {
    pub fn new(
        name: impl Into<String>,
        max_concurrent: usize,
        requests_per_minute: u32,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            turnstile: tokio::sync::Mutex::new(()),
            window: parking_lot::Mutex::new(RollingWindow::new(requests_per_minute)),
            timeout,
            retry,
        }
    }

    /// Build a gate from a backend's configuration block.
    pub fn from_backend_config(name: impl Into<String>, config: &BackendConfig) -> Self {
        Self::new(
            name,
            config.max_concurrent,
            config.requests_per_minute,
            Duration::from_secs(config.timeout_seconds),
            RetryPolicy::from_config(&config.retry),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for a rate-window slot. Callers queue on the turnstile, so slots
    /// are granted in submission order.
    async fn wait_for_slot(&self) {
        let _turn = self.turnstile.lock().await;
        loop {
            let admitted = self.window.lock().try_admit(Instant::now());
            match admitted {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Execute `op` under this gate's limits. `op` is invoked once per
    /// attempt; transient failures are retried per the gate's policy,
    /// permanent failures return immediately.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("gateway semaphore closed");
            self.wait_for_slot().await;

            let outcome = tokio::time::timeout(self.timeout, op()).await;
            drop(permit);

            let error = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        tracing::debug!(backend = %self.name, attempt, "Call recovered after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => DigestError::CallTimeout {
                    backend: self.name.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            if !error.is_transient() {
                tracing::warn!(backend = %self.name, error = %error, "Permanent failure, not retrying");
                return Err(error);
            }

            if attempt >= self.retry.max_attempts {
                return Err(DigestError::RetriesExhausted {
                    backend: self.name.clone(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let mut delay = self.retry.delay_for(attempt);
            if let DigestError::RateLimited {
                retry_after_seconds: Some(secs),
                ..
            } = &error
            {
                delay = delay.max(Duration::from_secs(*secs));
            }

            tracing::warn!(
                backend = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

    fn no_jitter_policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(60),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(4), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_until_success() {
        let gate = CallGate::new("filter", 2, 0, Duration::from_secs(5), no_jitter_policy(5, 10));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result = gate
            .call(move || {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(DigestError::TransientCall {
                            backend: "filter".to_string(),
                            details: "503".to_string(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let gate = CallGate::new("analysis", 2, 0, Duration::from_secs(5), no_jitter_policy(5, 10));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result: Result<()> = gate
            .call(move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DigestError::PermanentCall {
                        backend: "analysis".to_string(),
                        details: "401 Unauthorized".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(DigestError::PermanentCall { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_into_terminal_error() {
        let gate = CallGate::new("analysis", 2, 0, Duration::from_secs(5), no_jitter_policy(3, 10));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result: Result<()> = gate
            .call(move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DigestError::TransientCall {
                        backend: "analysis".to_string(),
                        details: "timeout".to_string(),
                    })
                }
            })
            .await;

        match result {
            Err(DigestError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_as_transient() {
        let gate = CallGate::new(
            "narrative",
            1,
            0,
            Duration::from_millis(100),
            no_jitter_policy(2, 10),
        );

        let result: Result<()> = gate
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        match result {
            Err(DigestError::RetriesExhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_is_enforced() {
        let gate = Arc::new(CallGate::new(
            "analysis",
            2,
            0,
            Duration::from_secs(60),
            no_jitter_policy(1, 10),
        ));
        let in_flight = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                gate.call(move || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    /// With a backlog of 50 pending calls and a ceiling of 3 per rolling
    /// 60-second window, no window may see more than 3 dispatches.
    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_rate_ceiling() {
        let gate = Arc::new(CallGate::new(
            "analysis",
            10,
            3,
            Duration::from_secs(600),
            no_jitter_policy(1, 10),
        ));
        let dispatches = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let gate = gate.clone();
            let dispatches = dispatches.clone();
            handles.push(tokio::spawn(async move {
                gate.call(move || {
                    let dispatches = dispatches.clone();
                    async move {
                        dispatches.lock().push(Instant::now());
                        Ok(())
                    }
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut stamps = dispatches.lock().clone();
        stamps.sort();
        assert_eq!(stamps.len(), 50);
        for pair in stamps.windows(4) {
            // The 4th dispatch after any given one must fall outside its window
            assert!(pair[3].duration_since(pair[0]) >= RATE_WINDOW);
        }
    }
}
