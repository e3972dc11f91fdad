//! Watch/Notify Protocol Error Hierarchy
//!
//! Defines error types for the object subscription engine, categorized by
//! protocol layer. Most protocol-level failures are absorbed internally (a
//! stale watcher becomes a "missed" entry, a late ack is dropped); only
//! dispatch-visible lookup failures and infrastructure errors surface here.

use std::time::Duration;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Watch/notify protocol failures visible to the dispatch layer
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Timer service scheduling failures
    #[error(transparent)]
    Timer(#[from] TimerError),

    /// Configuration loading/validation failures
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Operation addressed a watch that is not registered on the object
    #[error("No watch registered for (cookie={cookie}, entity={entity})")]
    UnknownWatcher { cookie: u64, entity: u64 },

    /// Per-object watcher cap reached
    #[error("Watcher limit reached ({limit}) for this object")]
    TooManyWatchers { limit: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// The timer service could not schedule a callback; the affected entity
    /// proceeds without a live timeout.
    #[error("Timer service failed to schedule callback after {0:?}")]
    ScheduleFailed(Duration),
}
