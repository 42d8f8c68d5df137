//! Bounded fixed-backoff retry for transient failures.
//!
//! Only errors the caller classifies as transient are retried. A permanent
//! error (authentication failure, missing object, ...) is returned on first
//! occurrence, and the attempt budget is never exceeded.

use std::future::Future;
use std::time::Duration;

use crate::cancel::CancelToken;

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// A single attempt with no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last: E },
    /// A non-transient error ended the loop.
    Permanent(E),
    /// Cancellation was requested between attempts.
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// The last underlying error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Permanent(e) => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, exhausts the policy, or is
/// cancelled. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    is_transient: C,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                if cancel.sleep(policy.interval).await {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Blip,
        Fatal,
    }

    fn transient(e: &TestError) -> bool {
        matches!(e, TestError::Blip)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result = retry(&policy, &CancelToken::new(), transient, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(TestError::Blip)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<(), _> = retry(&policy, &CancelToken::new(), transient, |_| async {
            Err(TestError::Blip)
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: TestError::Blip
            })
        );
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(10, Duration::from_millis(1));

        let result: Result<(), _> = retry(&policy, &CancelToken::new(), transient, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert_eq!(result, Err(RetryError::Permanent(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<(), RetryError<TestError>> =
            retry(&policy, &cancel, transient, |_| async { Ok(()) }).await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
    }
}
