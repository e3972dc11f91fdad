use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use super::TimerCallback;
use super::TimerService;
use super::TimerToken;

/// Production timer backed by the tokio runtime: one detached sleep task per
/// scheduled callback, aborted through the token's `CancellationToken`.
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self {
            runtime: Handle::current(),
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { runtime: handle }
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for TokioTimer {
    fn schedule(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Option<TimerToken> {
        let token = TimerToken::new();
        let cancelled = token.cancellation();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("scheduled callback cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    callback();
                }
            }
        });
        Some(token)
    }

    fn cancel(
        &self,
        token: &TimerToken,
    ) {
        token.cancel();
    }
}
