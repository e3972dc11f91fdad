use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::Notify;
use super::NotifyRef;
use super::Watch;
use super::WatchRef;
use super::WatcherId;
use crate::metrics::ACTIVE_WATCHES;
use crate::ConnRef;
use crate::Result;
use crate::Settings;
use crate::TimerService;
use crate::WatchError;

/// Closure run under the shard lock via [`ObjectHost::with_shard_locked`].
pub type ShardLockedFn = Box<dyn FnOnce() + Send>;

/// Boundary to the object-processing subsystem that owns the coarse
/// per-object-group lock (the shard lock) and the expiry policy.
#[cfg_attr(test, automock)]
pub trait ObjectHost: Send + Sync + 'static {
    /// Runs `f` with the shard lock held. All watch/notify lifecycle
    /// transitions triggered from timer threads are funneled through here.
    fn with_shard_locked(
        &self,
        f: ShardLockedFn,
    );

    /// Policy hook for a genuine watch liveness expiry; invoked with the
    /// shard lock held. Typical policy is `watch_unregister`.
    fn handle_watch_timeout(
        &self,
        watch: WatchRef,
    );
}

pub type HostRef = Arc<dyn ObjectHost>;

/// Per-object watcher set and client-operation facade.
///
/// All methods are called by the request-dispatch pipeline with the shard
/// lock already held; the inner mutex only protects the tables themselves
/// against the timer-thread paths that re-enter through `ObjectHost`.
pub struct ObjectWatchers {
    host: HostRef,
    timer: Arc<dyn TimerService>,
    settings: Settings,
    state: Mutex<ObjectState>,
}

struct ObjectState {
    watchers: BTreeMap<WatcherId, WatchRef>,
    /// Broadcasts not yet completed or discarded.
    in_flight: BTreeMap<u64, NotifyRef>,
    next_notify_id: u64,
    /// Object version stamped into broadcast events; maintained by the
    /// object-processing subsystem via `update_version`.
    version: u64,
}

impl ObjectWatchers {
    pub fn new(
        host: HostRef,
        timer: Arc<dyn TimerService>,
        settings: Settings,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            timer,
            settings,
            state: Mutex::new(ObjectState {
                watchers: BTreeMap::new(),
                in_flight: BTreeMap::new(),
                next_notify_id: 0,
                version: 0,
            }),
        })
    }

    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn get_watch(
        &self,
        id: &WatcherId,
    ) -> Option<WatchRef> {
        self.state.lock().watchers.get(id).cloned()
    }

    pub fn update_version(
        &self,
        version: u64,
    ) {
        self.state.lock().version = version;
    }

    /// Registers a watch for `(cookie, entity)` bound to `conn`, or
    /// re-connects the existing one (a client re-watching after reconnect
    /// must not end up with two subscriptions). `timeout_secs` of 0 selects
    /// the configured default; the effective window keeps the value the
    /// watch was first created with.
    pub fn watch_register(
        self: &Arc<Self>,
        conn: ConnRef,
        cookie: u64,
        entity: u64,
        timeout_secs: u32,
        requires_ping: bool,
    ) -> Result<WatchRef> {
        let id = WatcherId::new(cookie, entity);
        let watch = {
            let mut state = self.state.lock();
            match state.watchers.get(&id) {
                Some(existing) => existing.clone(),
                None => {
                    let limit = self.settings.watch.max_watchers_per_object;
                    if state.watchers.len() >= limit {
                        return Err(WatchError::TooManyWatchers { limit }.into());
                    }
                    let timeout = self.settings.watch.clamp_timeout(timeout_secs);
                    let watch = Watch::new(
                        self.host.clone(),
                        self.timer.clone(),
                        Arc::clone(self),
                        id,
                        conn.peer_addr(),
                        timeout,
                    );
                    state.watchers.insert(id, watch.clone());
                    ACTIVE_WATCHES.inc();
                    watch
                }
            }
        };
        watch.connect(conn, requires_ping);
        Ok(watch)
    }

    /// Client unwatch: removes the subscription, completing its pending
    /// notifies as watcher-removed and telling the client it is gone.
    pub fn watch_unregister(
        &self,
        id: WatcherId,
    ) -> Result<()> {
        let watch = self.state.lock().watchers.remove(&id).ok_or(WatchError::UnknownWatcher {
            cookie: id.cookie,
            entity: id.entity,
        })?;
        watch.remove(true);
        ACTIVE_WATCHES.dec();
        self.prune_completed();
        Ok(())
    }

    pub fn watch_ping(
        &self,
        id: WatcherId,
        now: Instant,
    ) -> Result<()> {
        let watch = self.state.lock().watchers.get(&id).cloned().ok_or(WatchError::UnknownWatcher {
            cookie: id.cookie,
            entity: id.entity,
        })?;
        watch.got_ping(now);
        Ok(())
    }

    /// Starts a broadcast to a snapshot of the current watcher set and
    /// returns its assigned notify id. The aggregated completion is
    /// delivered to `conn` asynchronously; with zero watchers it completes
    /// during `init`.
    pub fn notify_broadcast(
        &self,
        conn: ConnRef,
        notifier_id: u64,
        cookie: u64,
        payload: Vec<u8>,
        timeout_secs: u32,
    ) -> Result<u64> {
        let timeout = self.settings.notify.resolve_timeout(timeout_secs);
        let (notify, snapshot) = {
            let mut state = self.state.lock();
            state.next_notify_id += 1;
            let notify = Notify::new(
                conn,
                notifier_id,
                state.next_notify_id,
                cookie,
                state.version,
                payload,
                timeout,
                self.timer.clone(),
            );
            state.in_flight.insert(notify.notify_id(), notify.clone());
            let snapshot: Vec<WatchRef> = state.watchers.values().cloned().collect();
            (notify, snapshot)
        };
        debug!(notify_id = notify.notify_id(), watchers = snapshot.len(), "notify_broadcast");

        for watch in &snapshot {
            watch.start_notify(&notify);
        }
        notify.init();
        self.prune_completed();
        Ok(notify.notify_id())
    }

    /// Routes a watcher's acknowledgement. The watch absorbs late or
    /// duplicate acks silently; only an unknown watcher is reported back to
    /// the dispatch layer.
    pub fn notify_ack(
        &self,
        id: WatcherId,
        notify_id: u64,
        reply: Vec<u8>,
    ) -> Result<()> {
        let watch = self.state.lock().watchers.get(&id).cloned().ok_or(WatchError::UnknownWatcher {
            cookie: id.cookie,
            entity: id.entity,
        })?;
        watch.notify_ack(notify_id, reply);
        self.prune_completed();
        Ok(())
    }

    /// Object teardown: discard every watch and in-flight broadcast. No
    /// completion replies are sent.
    pub fn discard_all(&self) {
        let (watches, notifies) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.watchers), std::mem::take(&mut state.in_flight))
        };
        debug!(watches = watches.len(), notifies = notifies.len(), "discard_all");
        for (_, watch) in &watches {
            watch.discard();
            ACTIVE_WATCHES.dec();
        }
        for (_, notify) in notifies {
            if !notify.is_discarded() {
                notify.discard();
            }
        }
    }

    /// Completed and discarded broadcasts are dropped from the in-flight
    /// table as a side effect of the operation that resolved them.
    fn prune_completed(&self) {
        let mut state = self.state.lock();
        state.in_flight.retain(|_, notify| !notify.is_complete() && !notify.is_discarded());
    }
}
