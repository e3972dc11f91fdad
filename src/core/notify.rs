use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::WatchRef;
use super::WatcherId;
use crate::metrics::NOTIFY_COMPLETIONS;
use crate::timer::arm_or_log;
use crate::timer::TimeoutSlot;
use crate::ConnRef;
use crate::TimerService;
use crate::WatchEvent;

pub type NotifyRef = Arc<Notify>;

/// One in-flight broadcast to the watcher snapshot of an object.
///
/// The outstanding set shrinks as acknowledgements arrive or watchers drop
/// out; `maybe_complete` is the single completion gate, so the aggregated
/// reply is sent exactly once whether the last ack or the deadline arrives
/// first.
pub struct Notify {
    client: ConnRef,
    /// Global id of the broadcasting client, echoed in delivered events.
    notifier_id: u64,
    notify_id: u64,
    /// Linger cookie context supplied by the broadcasting client.
    cookie: u64,
    /// Object version at broadcast time.
    version: u64,
    payload: Vec<u8>,
    timeout: Duration,
    timer: Arc<dyn TimerService>,
    weak_self: Weak<Notify>,
    state: Mutex<NotifyState>,
}

struct NotifyState {
    complete: bool,
    discarded: bool,
    timed_out: bool,
    /// Watchers still expected to acknowledge.
    watchers: BTreeMap<WatcherId, WatchRef>,
    /// Collected acknowledgements.
    replies: BTreeMap<WatcherId, Vec<u8>>,
    timer_slot: TimeoutSlot,
}

impl Notify {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: ConnRef,
        notifier_id: u64,
        notify_id: u64,
        cookie: u64,
        version: u64,
        payload: Vec<u8>,
        timeout: Duration,
        timer: Arc<dyn TimerService>,
    ) -> NotifyRef {
        debug!(notify_id, notifier_id, ?timeout, "new notify");
        Arc::new_cyclic(|weak| Notify {
            client,
            notifier_id,
            notify_id,
            cookie,
            version,
            payload,
            timeout,
            timer,
            weak_self: weak.clone(),
            state: Mutex::new(NotifyState {
                complete: false,
                discarded: false,
                timed_out: false,
                watchers: BTreeMap::new(),
                replies: BTreeMap::new(),
                timer_slot: TimeoutSlot::default(),
            }),
        })
    }

    pub fn notify_id(&self) -> u64 {
        self.notify_id
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn notifier_id(&self) -> u64 {
        self.notifier_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn is_discarded(&self) -> bool {
        self.state.lock().discarded
    }

    pub fn timed_out(&self) -> bool {
        self.state.lock().timed_out
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.state.lock().watchers.len()
    }

    /// Arms the completion deadline, then immediately evaluates completion:
    /// a broadcast with zero registered watchers (or whose watchers all
    /// refused registration) completes on the spot.
    pub(crate) fn init(&self) {
        let mut state = self.state.lock();
        let weak = self.weak_self.clone();
        arm_or_log(&mut state.timer_slot, self.timer.as_ref(), self.timeout, |generation| {
            Box::new(move || {
                if let Some(notify) = weak.upgrade() {
                    notify.do_timeout(generation);
                }
            })
        });
        self.maybe_complete(&mut state);
    }

    /// Adds `watch` to the outstanding set. Called by `Watch::start_notify`
    /// under the shard lock.
    pub(crate) fn start_watcher(
        &self,
        watch: WatchRef,
    ) {
        let mut state = self.state.lock();
        debug!(notify_id = self.notify_id, watcher = %watch.id(), "start_watcher");
        state.watchers.insert(watch.id(), watch);
    }

    /// Records `watcher`'s acknowledgement and re-evaluates completion.
    /// Unknown watchers (already timed out, already acked) are ignored.
    pub(crate) fn complete_watcher(
        &self,
        watcher: WatcherId,
        reply: Vec<u8>,
    ) {
        let mut state = self.state.lock();
        if state.discarded {
            return;
        }
        if state.watchers.remove(&watcher).is_none() {
            debug!(notify_id = self.notify_id, watcher = %watcher, "ack from watcher not outstanding, ignoring");
            return;
        }
        debug!(notify_id = self.notify_id, watcher = %watcher, "complete_watcher");
        state.replies.insert(watcher, reply);
        self.maybe_complete(&mut state);
    }

    /// Drops `watcher` from the outstanding set without a reply (the watch
    /// was removed) and re-evaluates completion.
    pub(crate) fn complete_watcher_remove(
        &self,
        watcher: WatcherId,
    ) {
        let mut state = self.state.lock();
        if state.discarded {
            return;
        }
        debug!(notify_id = self.notify_id, watcher = %watcher, "complete_watcher_remove");
        state.watchers.remove(&watcher);
        self.maybe_complete(&mut state);
    }

    /// Object-teardown path: no client is left to receive the aggregated
    /// reply, so drop everything without completing.
    pub(crate) fn discard(&self) {
        debug!(notify_id = self.notify_id, "discard");
        let mut state = self.state.lock();
        state.discarded = true;
        state.timer_slot.disarm(self.timer.as_ref());
        state.watchers.clear();
        if !state.complete {
            NOTIFY_COMPLETIONS.with_label_values(&["discarded"]).inc();
        }
    }

    /// Deadline callback: forces completion, then asks every watcher that
    /// never acknowledged to drop this notify. The per-watch cleanup runs
    /// outside this notify's lock, taking each watch's shard lock first, to
    /// respect the engine lock order.
    fn do_timeout(
        &self,
        generation: u64,
    ) {
        let stale = {
            let mut state = self.state.lock();
            if !state.timer_slot.fired(generation) || state.discarded {
                None
            } else {
                debug!(notify_id = self.notify_id, "timeout");
                state.timed_out = true;
                self.maybe_complete(&mut state);
                debug_assert!(state.complete);
                Some(std::mem::take(&mut state.watchers))
            }
        };

        let Some(stale) = stale else { return };
        for (_, watch) in stale {
            let notify_id = self.notify_id;
            let target = watch.clone();
            watch.host().with_shard_locked(Box::new(move || {
                if !target.is_discarded() {
                    target.cancel_notify(notify_id);
                }
            }));
        }
    }

    /// Single completion gate: when the outstanding set is empty or the
    /// deadline passed, build the aggregated reply (acknowledged watchers
    /// with their payloads, still-outstanding watchers as "missed"), send it
    /// to the originating client once, and retire the timer.
    fn maybe_complete(
        &self,
        state: &mut NotifyState,
    ) {
        if state.complete {
            return;
        }
        if !state.watchers.is_empty() && !state.timed_out {
            return;
        }

        let replies: Vec<(WatcherId, Vec<u8>)> =
            state.replies.iter().map(|(id, reply)| (*id, reply.clone())).collect();
        let missed: Vec<WatcherId> = state.watchers.keys().copied().collect();
        debug!(
            notify_id = self.notify_id,
            replied = replies.len(),
            missed = missed.len(),
            timed_out = state.timed_out,
            "notify complete"
        );
        let outcome = if state.timed_out { "timed_out" } else { "acked" };
        NOTIFY_COMPLETIONS.with_label_values(&[outcome]).inc();

        self.client.send_event(WatchEvent::NotifyComplete {
            cookie: self.cookie,
            notify_id: self.notify_id,
            version: self.version,
            notifier_id: self.notifier_id,
            replies,
            missed,
            timed_out: state.timed_out,
        });
        state.timer_slot.disarm(self.timer.as_ref());
        state.complete = true;
    }
}
