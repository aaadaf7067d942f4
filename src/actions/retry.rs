//! Bounded retry with a single recovery action.

use std::future::{Future, Ready};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::error::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
}

impl RetryPolicy {
    /// One attempt, one recovery, one more attempt.
    pub fn once_with_recovery(per_attempt_timeout: Duration) -> Self {
        RetryPolicy {
            max_attempts: 2,
            per_attempt_timeout,
        }
    }

    pub async fn run<A, AF>(&self, attempt: A) -> RetryOutcome
    where
        A: FnMut(u32) -> AF,
        AF: Future<Output = Result<bool, ActionError>>,
    {
        self.run_with_recovery(attempt, None::<fn() -> Ready<Result<(), ActionError>>>)
            .await
    }

    /// Run `attempt` until it succeeds or attempts run out. `recovery` runs
    /// before the second attempt and never again. Errors, `Ok(false)` and
    /// timeouts all count as failed attempts.
    pub async fn run_with_recovery<A, AF, R, RF>(
        &self,
        mut attempt: A,
        mut recovery: Option<R>,
    ) -> RetryOutcome
    where
        A: FnMut(u32) -> AF,
        AF: Future<Output = Result<bool, ActionError>>,
        R: FnOnce() -> RF,
        RF: Future<Output = Result<(), ActionError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut outcome = RetryOutcome {
            succeeded: false,
            attempts: 0,
            recovered: false,
        };

        for number in 1..=max_attempts {
            if number > 1 {
                if let Some(recover) = recovery.take() {
                    outcome.recovered = true;
                    match timeout(self.per_attempt_timeout, recover()).await {
                        Ok(Ok(())) => log::debug!("recovery before attempt {number} completed"),
                        Ok(Err(err)) => log::debug!("recovery before attempt {number} failed: {err}"),
                        Err(_) => log::debug!("recovery before attempt {number} timed out"),
                    }
                }
            }

            outcome.attempts = number;
            match timeout(self.per_attempt_timeout, attempt(number)).await {
                Ok(Ok(true)) => {
                    outcome.succeeded = true;
                    return outcome;
                }
                Ok(Ok(false)) => log::debug!("attempt {number} did not succeed"),
                Ok(Err(err)) => log::debug!("attempt {number} failed: {err}"),
                Err(_) => log::debug!(
                    "attempt {number} timed out after {:?}",
                    self.per_attempt_timeout
                ),
            }
        }

        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub succeeded: bool,
    pub attempts: u32,
    pub recovered: bool,
}

impl RetryOutcome {
    pub fn into_result(self, action: &str) -> Result<RetryOutcome, ActionError> {
        if self.succeeded {
            Ok(self)
        } else {
            Err(ActionError::RetryExhausted {
                action: action.to_string(),
                attempts: self.attempts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ActionErrorKind, DriverError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::{Instant, sleep};

    fn policy() -> RetryPolicy {
        RetryPolicy::once_with_recovery(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_skips_recovery() {
        let recoveries = AtomicU32::new(0);
        let outcome = policy()
            .run_with_recovery(
                |_| async { Ok(true) },
                Some(|| async {
                    recoveries.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;
        assert_eq!(
            outcome,
            RetryOutcome {
                succeeded: true,
                attempts: 1,
                recovered: false
            }
        );
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_runs_once_between_attempts() {
        let recoveries = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&recoveries);
        let outcome = policy()
            .run_with_recovery(
                |number| async move { Ok(number == 2) },
                Some(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.recovered);
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_never_runs_twice_even_with_more_attempts() {
        let recoveries = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&recoveries);
        let outcome = RetryPolicy {
            max_attempts: 4,
            per_attempt_timeout: Duration::from_secs(1),
        }
        .run_with_recovery(
            |_| async { Err(ActionError::code_entry("still failing")) },
            Some(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_is_a_failed_attempt() {
        let started = Instant::now();
        let outcome = policy()
            .run(|_| async {
                sleep(Duration::from_secs(60)).await;
                Ok(true)
            })
            .await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_recovery_still_allows_retry() {
        let outcome = policy()
            .run_with_recovery(
                |number| async move { Ok(number == 2) },
                Some(|| async { Err(DriverError::Command("reload failed".into()).into()) }),
            )
            .await;
        assert!(outcome.succeeded);
        assert!(outcome.recovered);
    }

    #[test]
    fn exhausted_outcome_maps_to_error() {
        let outcome = RetryOutcome {
            succeeded: false,
            attempts: 2,
            recovered: true,
        };
        let err = outcome.into_result("liveness").expect_err("exhausted");
        assert_eq!(err.kind(), ActionErrorKind::RetryExhausted);
        assert!(err.to_string().contains("2 attempts"));
    }
}
