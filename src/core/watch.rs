use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::HostRef;
use super::NotifyRef;
use super::ObjectWatchers;
use super::WatcherId;
use crate::metrics::WATCH_TIMEOUTS;
use crate::timer::arm_or_log;
use crate::timer::TimeoutSlot;
use crate::ConnRef;
use crate::TimerService;
use crate::WatchEvent;

pub type WatchRef = Arc<Watch>;

/// One live subscription binding a client connection to an object.
///
/// A watch is shared between the object's watcher set, its connection's
/// registry, and every notify awaiting its acknowledgement; the entity is
/// destroyed once all of those release it. Timer callbacks hold only a weak
/// self-reference, upgraded for the duration of the callback.
///
/// Lifecycle entry points (`connect`, `disconnect`, `discard`, `remove`) are
/// called with the shard lock already held by the caller.
pub struct Watch {
    host: HostRef,
    timer: Arc<dyn TimerService>,
    id: WatcherId,
    peer_addr: String,
    /// Liveness window: the watch expires when neither a ping nor a
    /// connection refresh arrives within this duration.
    timeout: Duration,
    weak_self: Weak<Watch>,
    state: Mutex<WatchState>,
}

struct WatchState {
    conn: Option<ConnRef>,
    /// When set, the client promised explicit pings; liveness is enforced
    /// even while connected. Otherwise the watch is implicitly alive while
    /// its connection holds.
    requires_ping: bool,
    last_ping: Instant,
    discarded: bool,
    /// Back-reference pinning the owning object's watcher table; released
    /// exactly once, on discard/remove.
    object: Option<Arc<ObjectWatchers>>,
    /// Notifies currently awaiting this watcher's acknowledgement, ordered
    /// by notify id.
    in_progress: BTreeMap<u64, NotifyRef>,
    timer_slot: TimeoutSlot,
}

impl std::fmt::Debug for Watch {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Watch {
    pub(crate) fn new(
        host: HostRef,
        timer: Arc<dyn TimerService>,
        object: Arc<ObjectWatchers>,
        id: WatcherId,
        peer_addr: String,
        timeout: Duration,
    ) -> WatchRef {
        debug!(watcher = %id, ?timeout, "new watch");
        Arc::new_cyclic(|weak| Watch {
            host,
            timer,
            id,
            peer_addr,
            timeout,
            weak_self: weak.clone(),
            state: Mutex::new(WatchState {
                conn: None,
                requires_ping: false,
                last_ping: Instant::now(),
                discarded: false,
                object: Some(object),
                in_progress: BTreeMap::new(),
                timer_slot: TimeoutSlot::default(),
            }),
        })
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub(crate) fn host(&self) -> &HostRef {
        &self.host
    }

    /// The owning object's watcher table, until discard/remove releases it.
    pub fn object(&self) -> Option<Arc<ObjectWatchers>> {
        self.state.lock().object.clone()
    }

    pub fn is_discarded(&self) -> bool {
        self.state.lock().discarded
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().conn.is_some()
    }

    pub fn is_connected_to(
        &self,
        conn: &ConnRef,
    ) -> bool {
        match &self.state.lock().conn {
            Some(bound) => Arc::ptr_eq(bound, conn),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn timer_armed(&self) -> bool {
        self.state.lock().timer_slot.is_armed()
    }

    /// Binds the watch to `conn`. No-op when already bound to the same
    /// connection. Registers with the connection's registry, flushes any
    /// notifies queued while disconnected, then re-arms (ping-based
    /// liveness) or cancels (connection-based liveness) the timer.
    pub fn connect(
        &self,
        conn: ConnRef,
        requires_ping: bool,
    ) {
        let mut state = self.state.lock();
        if let Some(bound) = &state.conn {
            if Arc::ptr_eq(bound, &conn) {
                debug!(watcher = %self.id, "already connected");
                return;
            }
            // Moving between connections: leave the old registry so the
            // watch is bound to at most one at a time.
            if let Some(registry) = bound.registry() {
                registry.remove_watch(&self.id);
            }
        }
        debug!(watcher = %self.id, peer = %conn.peer_addr(), requires_ping, "connect");
        state.conn = Some(conn.clone());
        state.requires_ping = requires_ping;

        if let Some(registry) = conn.registry() {
            if let Some(strong) = self.weak_self.upgrade() {
                registry.add_watch(strong);
            }
            for notify in state.in_progress.values() {
                send_notify_event(&conn, self.id, notify);
            }
        }

        if requires_ping {
            state.last_ping = Instant::now();
            self.rearm_timer(&mut state);
        } else {
            state.timer_slot.disarm(self.timer.as_ref());
        }
    }

    /// Clears the bound connection. For connection-based liveness the timer
    /// is re-armed here: disconnection starts the liveness clock, so a watch
    /// does not live forever just because its socket dropped.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        debug!(watcher = %self.id, "disconnect");
        state.conn = None;
        if !state.requires_ping {
            self.rearm_timer(&mut state);
        }
    }

    /// Records a liveness ping. Re-arms the timer only while connected; a
    /// discarded watch is not resurrected.
    pub fn got_ping(
        &self,
        now: Instant,
    ) {
        let mut state = self.state.lock();
        if state.discarded {
            return;
        }
        state.last_ping = now;
        if state.conn.is_some() {
            self.rearm_timer(&mut state);
        }
    }

    /// Registers `notify` as awaiting this watcher and delivers it when
    /// connected.
    ///
    /// Stale-ping policy: a ping-based watch whose last ping is older than
    /// its liveness window is presumed dead; it disconnects itself and does
    /// not register, so the notify reports it as missed instead of waiting.
    pub(crate) fn start_notify(
        self: &Arc<Self>,
        notify: &NotifyRef,
    ) {
        let mut state = self.state.lock();
        debug_assert!(!state.in_progress.contains_key(&notify.notify_id()));
        if state.requires_ping && state.last_ping.elapsed() > self.timeout {
            debug!(
                watcher = %self.id,
                notify_id = notify.notify_id(),
                "last ping beyond liveness window, disconnecting"
            );
            state.conn = None;
            return;
        }
        debug!(watcher = %self.id, notify_id = notify.notify_id(), "start_notify");
        state.in_progress.insert(notify.notify_id(), notify.clone());
        notify.start_watcher(self.clone());
        if let Some(conn) = &state.conn {
            send_notify_event(conn, self.id, notify);
        }
    }

    /// Drops a tracked notify without delivering anything further. Used when
    /// the notify timed out or was discarded while still outstanding here.
    pub(crate) fn cancel_notify(
        &self,
        notify_id: u64,
    ) {
        debug!(watcher = %self.id, notify_id, "cancel_notify");
        self.state.lock().in_progress.remove(&notify_id);
    }

    /// Forwards an acknowledgement to the tracked notify. Late or duplicate
    /// acks find no entry and are silently dropped.
    pub fn notify_ack(
        &self,
        notify_id: u64,
        reply: Vec<u8>,
    ) {
        let notify = self.state.lock().in_progress.remove(&notify_id);
        match notify {
            Some(notify) => notify.complete_watcher(self.id, reply),
            None => debug!(watcher = %self.id, notify_id, "ack for unknown notify, ignoring"),
        }
    }

    /// Object-teardown path: errors every tracked notify (no client is left
    /// to receive their replies), then discards local state. Caller holds
    /// the shard lock.
    pub fn discard(&self) {
        debug!(watcher = %self.id, "discard");
        let notifies: Vec<NotifyRef> = self.state.lock().in_progress.values().cloned().collect();
        for notify in notifies {
            notify.discard();
        }
        self.discard_state();
    }

    /// Removal path (client unwatch or liveness expiry): completes every
    /// tracked notify as if this watcher had dropped out, optionally telling
    /// the client first, then discards local state. Caller holds the shard
    /// lock.
    pub fn remove(
        &self,
        send_disconnect: bool,
    ) {
        debug!(watcher = %self.id, send_disconnect, "remove");
        let (conn, notifies) = {
            let state = self.state.lock();
            let notifies: Vec<NotifyRef> = state.in_progress.values().cloned().collect();
            (state.conn.clone(), notifies)
        };
        if send_disconnect {
            if let Some(conn) = &conn {
                conn.send_event(WatchEvent::Disconnect { cookie: self.id.cookie });
            }
        }
        for notify in notifies {
            notify.complete_watcher_remove(self.id);
        }
        self.discard_state();
    }

    /// Releases everything exactly once: tracked notifies, the timer, the
    /// registry membership, and the object back-reference.
    fn discard_state(&self) {
        let mut state = self.state.lock();
        if state.discarded {
            debug_assert!(false, "watch discarded twice");
            warn!(watcher = %self.id, "discard on an already-discarded watch");
            return;
        }
        state.in_progress.clear();
        state.timer_slot.disarm(self.timer.as_ref());
        state.discarded = true;
        if let Some(conn) = state.conn.take() {
            if let Some(registry) = conn.registry() {
                registry.remove_watch(&self.id);
            }
        }
        state.object = None;
    }

    fn rearm_timer(
        &self,
        state: &mut WatchState,
    ) {
        let weak = self.weak_self.clone();
        arm_or_log(&mut state.timer_slot, self.timer.as_ref(), self.timeout, |generation| {
            Box::new(move || {
                if let Some(watch) = weak.upgrade() {
                    watch.liveness_expired(generation);
                }
            })
        });
    }

    /// Timer callback: runs with no locks held, takes the shard lock, then
    /// this watch's lock, and only then checks whether this arm is still
    /// current. Genuine expiry is handed to the object's policy hook.
    fn liveness_expired(
        self: Arc<Self>,
        generation: u64,
    ) {
        let host = self.host.clone();
        let watch = self;
        host.clone().with_shard_locked(Box::new(move || {
            let expired = {
                let mut state = watch.state.lock();
                !state.discarded && state.timer_slot.fired(generation)
            };
            if expired {
                debug!(watcher = %watch.id, "liveness timeout");
                WATCH_TIMEOUTS.inc();
                host.handle_watch_timeout(watch.clone());
            }
        }));
    }
}

fn send_notify_event(
    conn: &ConnRef,
    watcher: WatcherId,
    notify: &NotifyRef,
) {
    conn.send_event(WatchEvent::Notify {
        cookie: watcher.cookie,
        notify_id: notify.notify_id(),
        version: notify.version(),
        notifier_id: notify.notifier_id(),
        payload: notify.payload().to_vec(),
    });
}
