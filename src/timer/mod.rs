//! Abstract one-shot timer service consumed by watches and notifies.
//!
//! The service is injected rather than global so tests can drive callbacks
//! deterministically. Cancellation is best-effort: a callback may already be
//! running on another thread when `cancel` is called, so every timer-driven
//! action re-checks its arm generation under the owning entity's lock before
//! acting (see `TimeoutSlot`).

mod tokio_timer;
pub use tokio_timer::*;


use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::TimerError;

/// One-shot callback executed by the timer service on a thread of its choice.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

#[cfg_attr(test, automock)]
pub trait TimerService: Send + Sync + 'static {
    /// Schedules `callback` to run once after `delay`.
    ///
    /// Returns `None` if scheduling itself failed; the caller proceeds with
    /// its timeout disabled.
    fn schedule(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Option<TimerToken>;

    /// Best-effort cancellation; may race with the callback firing.
    fn cancel(
        &self,
        token: &TimerToken,
    );
}

/// Handle to one scheduled callback.
#[derive(Clone, Debug)]
pub struct TimerToken {
    cancel: CancellationToken,
}

impl TimerToken {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Per-entity slot holding the pending timer callback, guarded by the
/// entity's own lock.
///
/// Every arm/disarm bumps `generation`; a fired callback must present the
/// generation it was armed with, so a firing that raced with cancellation
/// observes the bump and becomes a no-op. At most one token is outstanding
/// at any time.
#[derive(Default)]
pub(crate) struct TimeoutSlot {
    token: Option<TimerToken>,
    generation: u64,
}

impl TimeoutSlot {
    /// Cancels any outstanding callback and supersedes in-flight firings.
    pub(crate) fn disarm(
        &mut self,
        timer: &dyn TimerService,
    ) {
        self.generation += 1;
        if let Some(token) = self.token.take() {
            timer.cancel(&token);
        }
    }

    /// Disarms, then schedules a fresh callback after `delay`. `make_callback`
    /// receives the new arm generation to capture into the callback.
    pub(crate) fn arm(
        &mut self,
        timer: &dyn TimerService,
        delay: Duration,
        make_callback: impl FnOnce(u64) -> TimerCallback,
    ) -> std::result::Result<(), TimerError> {
        self.disarm(timer);
        let generation = self.generation;
        match timer.schedule(delay, make_callback(generation)) {
            Some(token) => {
                self.token = Some(token);
                Ok(())
            }
            None => Err(TimerError::ScheduleFailed(delay)),
        }
    }

    /// Records that the callback armed at `generation` has fired. Returns
    /// false when that arm was superseded in the meantime.
    pub(crate) fn fired(
        &mut self,
        generation: u64,
    ) -> bool {
        if self.generation == generation {
            self.token = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.token.is_some()
    }
}

/// Arms `slot`, logging (rather than propagating) a scheduling failure: the
/// entity then simply never expires, which the surrounding system tolerates.
pub(crate) fn arm_or_log(
    slot: &mut TimeoutSlot,
    timer: &dyn TimerService,
    delay: Duration,
    make_callback: impl FnOnce(u64) -> TimerCallback,
) {
    if let Err(e) = slot.arm(timer, delay, make_callback) {
        warn!("timeout disabled for this entity: {}", e);
    }
}
