//! Deadline enforcement for supervised work.

use std::future::Future;
use std::time::Duration;

use canopy_core::CanonicalError;

/// Race `work` against an optional deadline.
///
/// The work is spawned as an independent task and observed through its join
/// handle; whichever side settles first determines the outcome. When the
/// deadline fires the task is **not** aborted: it keeps running to
/// completion and may still produce side effects (late timeline markers, a
/// second slow-tracking analysis) after the timeout has been reported.
/// Downstream telemetry writes must therefore be upsert-safe.
///
/// With no deadline configured the work is simply awaited.
pub async fn with_deadline<T, F>(work: F, deadline: Option<Duration>) -> Result<T, CanonicalError>
where
    F: Future<Output = Result<T, CanonicalError>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(work);

    let Some(timeout) = deadline else {
        return flatten(handle.await);
    };

    tokio::select! {
        joined = handle => flatten(joined),
        _ = tokio::time::sleep(timeout) => Err(CanonicalError::timeout()),
    }
}

fn flatten<T>(
    joined: Result<Result<T, CanonicalError>, tokio::task::JoinError>,
) -> Result<T, CanonicalError> {
    match joined {
        Ok(result) => result,
        // Panicked or cancelled work still normalizes to a canonical failure.
        Err(err) => Err(CanonicalError::script_failed(format!(
            "handler task failed: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::error::SCRIPT_FAILED;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fast_work_wins_the_race() {
        let result = with_deadline(
            async { Ok::<_, CanonicalError>(7) },
            Some(Duration::from_millis(100)),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_yields_the_fixed_timeout_error() {
        let result: Result<(), _> = with_deadline(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Some(Duration::from_millis(100)),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, SCRIPT_FAILED);
        assert_eq!(err.message, "Script timed out.");
    }

    #[tokio::test(start_paused = true)]
    async fn loser_keeps_running_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let result: Result<(), _> = with_deadline(
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Some(Duration::from_millis(50)),
        )
        .await;

        assert!(result.is_err());
        assert!(!finished.load(Ordering::SeqCst));

        // The detached task completes on its own after the deadline fired.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_deadline_means_plain_await() {
        let result = with_deadline(async { Ok::<_, CanonicalError>("done") }, None).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn panicking_work_normalizes() {
        let result: Result<(), _> =
            with_deadline(async { panic!("boom") }, Some(Duration::from_secs(1))).await;
        assert_eq!(result.unwrap_err().code, SCRIPT_FAILED);
    }
}
