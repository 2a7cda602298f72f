//! Cancellation propagation: every long-running operation accepts
//! cancellation. Graph traversal checks it at each node visit;
//! directory-grant expansion checks it between batches and persists
//! partial progress. A thin re-export wrapper over
//! `tokio_util::sync::CancellationToken` so call sites depend on this crate
//! rather than reaching for `tokio-util` directly.

pub use tokio_util::sync::CancellationToken;

/// Error returned when a cancellation-aware operation observes its token
/// fired partway through.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Checks `token` and returns `Err(Cancelled)` if it has fired. Call at
/// each graph-traversal node visit and between directory-grant expansion
/// batches.
pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fired_token_is_detected() {
        let token = CancellationToken::new();
        assert!(check(&token).is_ok());
        token.cancel();
        assert!(check(&token).is_err());
    }
}
