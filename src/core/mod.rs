//! Core entities of the subscription protocol: `Watch` (one live
//! subscription), `Notify` (one in-flight broadcast), and `ObjectWatchers`
//! (the per-object watcher set and client-operation facade).
//!
//! Lock order across the engine, outer to inner: timer-service internals,
//! then the shard lock (owned by the object-processing subsystem, reached
//! through `ObjectHost`), then each entity's own mutex. Timer callbacks run
//! with no locks held and re-acquire in that order.

mod notify;
mod object;
mod watch;
pub use notify::*;
pub use object::*;
pub use watch::*;

#[cfg(test)]
mod notify_test;

use serde::Deserialize;
use serde::Serialize;

/// Identity of one watch subscription on an object.
///
/// `entity` is the subscribing principal's global id; `cookie` is chosen by
/// the client to disambiguate multiple watches by the same principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatcherId {
    pub cookie: u64,
    pub entity: u64,
}

impl WatcherId {
    pub fn new(
        cookie: u64,
        entity: u64,
    ) -> Self {
        Self { cookie, entity }
    }
}

impl std::fmt::Display for WatcherId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "({},{})", self.cookie, self.entity)
    }
}
