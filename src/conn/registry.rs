use dashmap::DashMap;
use tracing::debug;
use tracing::warn;

use super::ConnRef;
use crate::WatchRef;
use crate::WatcherId;

/// Per-connection set of bound watches.
///
/// Entries are added by `Watch::connect` and removed when a watch moves to
/// another connection or is discarded, so a watch appears in at most one
/// registry at a time. The registry itself never owns lifecycle decisions;
/// `reset` only asks each watch to disconnect under the shard lock.
#[derive(Default)]
pub struct ConnWatchRegistry {
    watches: DashMap<WatcherId, WatchRef>,
}

impl ConnWatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_watch(
        &self,
        watch: WatchRef,
    ) {
        self.watches.insert(watch.id(), watch);
    }

    pub(crate) fn remove_watch(
        &self,
        id: &WatcherId,
    ) {
        self.watches.remove(id);
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Connection reset: drain the registry and disconnect every watch that
    /// is still bound to `conn`. Each watch is handled under its object's
    /// shard lock, matching the lifecycle lock order.
    pub fn reset(
        &self,
        conn: &ConnRef,
    ) {
        let drained: Vec<WatchRef> = self.watches.iter().map(|entry| entry.value().clone()).collect();
        self.watches.clear();
        debug!("connection reset: disconnecting {} watches", drained.len());

        for watch in drained {
            let conn = conn.clone();
            let target = watch.clone();
            watch.host().with_shard_locked(Box::new(move || {
                if target.is_discarded() {
                    return;
                }
                if target.is_connected_to(&conn) {
                    target.disconnect();
                } else {
                    warn!(
                        cookie = target.id().cookie,
                        entity = target.id().entity,
                        "watch no longer bound to the resetting connection"
                    );
                }
            }));
        }
    }
}
