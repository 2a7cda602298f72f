//! Thread-pool bridge for synchronous callers: synchronous relational
//! clients run inside a worker pool, and cancellation of the caller must
//! not leak workers. Pairs `spawn_blocking` with `tokio::time::timeout` so
//! any blocking closure a sync FUSE-style caller needs to run against the
//! async engine gets a bounded wait with no orphaned thread left behind.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("blocking worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("blocking call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Runs a blocking closure on Tokio's blocking thread pool with a timeout.
/// If the timeout elapses, the spawned task is detached rather than joined
/// — `spawn_blocking` tasks are not cancellable mid-execution — but the
/// caller's `await` returns immediately, so a slow worker never blocks the
/// caller past `timeout`.
pub async fn run_blocking<F, T>(timeout: Duration, f: F) -> Result<T, BridgeError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(BridgeError::WorkerPanicked(join_err.to_string())),
        Err(_) => Err(BridgeError::TimedOut(timeout)),
    }
}

/// Synchronous entry point for callers that cannot `.await` (e.g. a FUSE
/// filesystem driver calling into the engine from a non-async dispatch
/// thread). Blocks the calling OS thread on a `tokio::runtime::Handle`
/// already running elsewhere; must not itself be called from inside that
/// runtime's own worker threads (would panic on nested block_on).
pub fn block_on_handle<F, T>(handle: &tokio::runtime::Handle, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::task::block_in_place(|| handle.block_on(fut))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocking_call_within_timeout_succeeds() {
        let result = run_blocking(Duration::from_secs(1), || 2 + 2).await;
        assert_eq!(result.unwrap(), 4);
    }

    #[tokio::test]
    async fn blocking_call_exceeding_timeout_errors() {
        let result = run_blocking(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            1
        })
        .await;
        assert!(matches!(result, Err(BridgeError::TimedOut(_))));
    }
}
