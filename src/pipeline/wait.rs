//! Bounded polling used instead of fixed sleeps.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Why a wait ended without the condition being met.
#[derive(Debug, thiserror::Error)]
pub enum WaitError<E: std::error::Error + 'static> {
    /// Condition still false when the timeout elapsed
    #[error("condition not met within {0:?}")]
    Timeout(Duration),

    /// The check itself failed
    #[error(transparent)]
    Check(E),
}

/// Poll `predicate` every `interval` until it returns `Ok(true)`.
///
/// The predicate is evaluated at least once, even with a zero timeout.
///
/// # Errors
///
/// Returns [`WaitError::Check`] as soon as the predicate fails, and
/// [`WaitError::Timeout`] once `timeout` has elapsed.
pub async fn wait_until<F, Fut, E>(
    mut predicate: F,
    interval: Duration,
    timeout: Duration,
) -> Result<(), WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + 'static,
{
    let deadline = Instant::now() + timeout;

    loop {
        if predicate().await.map_err(WaitError::Check)? {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout(timeout));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Sleep until at least `minimum` has passed since `since`.
pub async fn settle(since: Instant, minimum: Duration) {
    tokio::time::sleep_until(since + minimum).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("probe failed")]
    struct ProbeError;

    #[tokio::test]
    async fn test_returns_once_condition_holds() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result = wait_until(
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProbeError>(n >= 2)
            },
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result = wait_until(
            || async { Ok::<_, ProbeError>(false) },
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .await;

        assert!(matches!(result, Err(WaitError::Timeout(d)) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_zero_timeout_still_checks_once() {
        let result = wait_until(
            || async { Ok::<_, ProbeError>(true) },
            Duration::from_millis(5),
            Duration::ZERO,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_check_error_propagates() {
        let result = wait_until(
            || async { Err::<bool, _>(ProbeError) },
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(WaitError::Check(ProbeError))));
    }

    #[tokio::test]
    async fn test_settle_waits_remaining_time() {
        let start = Instant::now();
        settle(start, Duration::from_millis(30)).await;
        assert!(start.elapsed() >= Duration::from_millis(30));

        // Already elapsed: returns immediately
        let before = Instant::now();
        settle(start, Duration::ZERO).await;
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
