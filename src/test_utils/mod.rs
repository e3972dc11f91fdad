//! Deterministic fakes for unit tests: a manually fired timer service, a
//! recording connection, and an inline shard-lock host.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ClientConn;
use crate::ConnRef;
use crate::ConnWatchRegistry;
use crate::ObjectHost;
use crate::ObjectWatchers;
use crate::Settings;
use crate::TimerCallback;
use crate::TimerService;
use crate::TimerToken;
use crate::WatchEvent;
use crate::WatchRef;
use crate::WatcherId;

struct Scheduled {
    delay: Duration,
    callback: TimerCallback,
    token: TimerToken,
}

/// Timer service whose callbacks fire only when the test says so.
#[derive(Default)]
pub struct ManualTimer {
    pending: Mutex<Vec<Scheduled>>,
    fail_next: AtomicBool,
}

impl ManualTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scheduled entries whose tokens have not been cancelled.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().iter().filter(|s| !s.token.is_cancelled()).count()
    }

    /// Makes the next `schedule` call fail, simulating a timer service that
    /// could not register the callback.
    pub fn fail_next_schedule(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Fires every pending callback that was not cancelled.
    pub fn fire_all(&self) {
        let drained: Vec<Scheduled> = self.pending.lock().drain(..).collect();
        for scheduled in drained {
            if !scheduled.token.is_cancelled() {
                (scheduled.callback)();
            }
        }
    }

    /// Fires every pending callback, cancelled or not: models the race
    /// where cancellation was requested after the callback already started
    /// running on the timer thread.
    pub fn fire_all_ignoring_cancel(&self) {
        let drained: Vec<Scheduled> = self.pending.lock().drain(..).collect();
        for scheduled in drained {
            (scheduled.callback)();
        }
    }

    /// Fires only callbacks scheduled with a delay of at most `elapsed`.
    pub fn fire_elapsed(
        &self,
        elapsed: Duration,
    ) {
        let (due, later): (Vec<Scheduled>, Vec<Scheduled>) =
            self.pending.lock().drain(..).partition(|s| s.delay <= elapsed);
        self.pending.lock().extend(later);
        for scheduled in due {
            if !scheduled.token.is_cancelled() {
                (scheduled.callback)();
            }
        }
    }
}

impl TimerService for ManualTimer {
    fn schedule(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Option<TimerToken> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return None;
        }
        let token = TimerToken::new();
        self.pending.lock().push(Scheduled {
            delay,
            callback,
            token: token.clone(),
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

/// Connection stub that records every delivered event.
pub struct TestConn {
    peer: String,
    registry: ConnWatchRegistry,
    events: Mutex<Vec<WatchEvent>>,
}

impl TestConn {
    pub fn new(peer: &str) -> Arc<Self> {
        Arc::new(Self {
            peer: peer.to_string(),
            registry: ConnWatchRegistry::new(),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<WatchEvent> {
        self.events.lock().clone()
    }

    pub fn take_events(&self) -> Vec<WatchEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn completions(&self) -> Vec<WatchEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, WatchEvent::NotifyComplete { .. }))
            .cloned()
            .collect()
    }
}

impl ClientConn for TestConn {
    fn send_event(
        &self,
        event: WatchEvent,
    ) {
        self.events.lock().push(event);
    }

    fn registry(&self) -> Option<&ConnWatchRegistry> {
        Some(&self.registry)
    }

    fn peer_addr(&self) -> String {
        self.peer.clone()
    }
}

pub fn as_conn(conn: &Arc<TestConn>) -> ConnRef {
    conn.clone()
}

/// Shard-lock owner that serializes closures through one mutex and records
/// watch expiries. Expiry applies the typical policy: unregister the watch
/// from its owning object.
#[derive(Default)]
pub struct StubHost {
    shard: Mutex<()>,
    timeouts: Mutex<Vec<WatcherId>>,
}

impl StubHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorded_timeouts(&self) -> Vec<WatcherId> {
        self.timeouts.lock().clone()
    }
}

impl ObjectHost for StubHost {
    fn with_shard_locked(
        &self,
        f: Box<dyn FnOnce() + Send>,
    ) {
        let _guard = self.shard.lock();
        f();
    }

    fn handle_watch_timeout(
        &self,
        watch: WatchRef,
    ) {
        self.timeouts.lock().push(watch.id());
        if let Some(object) = watch.object() {
            let _ = object.watch_unregister(watch.id());
        }
    }
}

/// Standard test fixture: one object wired to a `StubHost` and a
/// `ManualTimer`, with default settings.
pub fn test_object() -> (Arc<StubHost>, Arc<ManualTimer>, Arc<ObjectWatchers>) {
    let host = StubHost::new();
    let timer = ManualTimer::new();
    let object = ObjectWatchers::new(host.clone(), timer.clone(), Settings::default());
    (host, timer, object)
}
