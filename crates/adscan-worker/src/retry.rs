//! Stage retry policy with exponential backoff and per-attempt timeouts.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use adscan_models::{StageAttempt, StageName, StageOutcome};

use crate::error::{StageError, StageResult};
use crate::metrics;

/// How often a stage is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(2u32.pow(exponent)).min(self.max_delay)
    }
}

/// Outcome of [`run_with_retry`] plus the ledger of what happened.
#[derive(Debug)]
pub struct StageRun<T> {
    pub result: StageResult<T>,
    pub attempts: Vec<StageAttempt>,
}

/// Run one stage under `policy`.
///
/// Each attempt gets `timeout`. A timeout is transient unless
/// `escalate_timeouts` is set, in which case it is permanent. Permanent
/// errors stop immediately; exhausting the attempts turns the last transient
/// error permanent.
pub async fn run_with_retry<'f, T, F>(
    policy: &RetryPolicy,
    stage: StageName,
    timeout: Duration,
    escalate_timeouts: bool,
    mut op: F,
) -> StageRun<T>
where
    F: FnMut() -> BoxFuture<'f, StageResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::new();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let started_at = Utc::now();
        let clock = Instant::now();

        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => {
                let msg = format!("timed out after {}s", timeout.as_secs_f64());
                if escalate_timeouts {
                    Err(StageError::Permanent(format!("{msg}; source already reported as unavailable")))
                } else {
                    Err(StageError::Transient(msg))
                }
            }
        };

        let outcome = match &result {
            Ok(_) => StageOutcome::Success,
            Err(StageError::Transient(_)) => StageOutcome::TransientFailure,
            Err(StageError::Permanent(_)) => StageOutcome::PermanentFailure,
        };
        metrics::record_stage_attempt(stage, outcome, clock.elapsed());
        attempts.push(StageAttempt {
            stage,
            attempt,
            started_at,
            finished_at: Utc::now(),
            outcome,
            error: result.as_ref().err().map(|e| e.message().to_string()),
        });

        match result {
            Ok(value) => {
                return StageRun {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    stage = %stage,
                    attempt,
                    "Stage attempt failed, retrying in {:?}: {}",
                    delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(stage = %stage, attempts = attempt, "Stage retries exhausted: {}", e);
                }
                return StageRun {
                    result: Err(e.into_permanent()),
                    attempts,
                };
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Useful for background tasks (like heartbeats) that run continuously
/// and should suppress log spam after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let run = run_with_retry(&fast_policy(3), StageName::Download, Duration::from_secs(5), false, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StageError::transient("connection reset"))
                } else {
                    Ok(42)
                }
            }
            .boxed()
        })
        .await;

        assert_eq!(run.result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let outcomes: Vec<_> = run.attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(outcomes, vec![StageOutcome::TransientFailure, StageOutcome::Success]);
        assert_eq!(run.attempts[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let calls = AtomicU32::new(0);
        let run: StageRun<()> = run_with_retry(&fast_policy(3), StageName::Download, Duration::from_secs(5), false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StageError::permanent("Private video")) }.boxed()
        })
        .await;

        assert_eq!(run.result, Err(StageError::permanent("Private video")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_transient_becomes_permanent() {
        let calls = AtomicU32::new(0);
        let run: StageRun<()> = run_with_retry(&fast_policy(3), StageName::Transcribe, Duration::from_secs(5), false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StageError::transient("503")) }.boxed()
        })
        .await;

        assert_eq!(run.result, Err(StageError::permanent("503")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(run.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let calls = AtomicU32::new(0);
        let run = run_with_retry(&fast_policy(2), StageName::VisualDetect, Duration::from_millis(20), false, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok("done")
            }
            .boxed()
        })
        .await;

        assert_eq!(run.result, Ok("done"));
        assert_eq!(run.attempts[0].outcome, StageOutcome::TransientFailure);
    }

    #[tokio::test]
    async fn test_escalated_timeout_is_permanent() {
        let calls = AtomicU32::new(0);
        let run: StageRun<()> = run_with_retry(&fast_policy(3), StageName::Download, Duration::from_millis(20), true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
            .boxed()
        })
        .await;

        assert!(matches!(run.result, Err(StageError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }
}
