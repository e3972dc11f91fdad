//! Boundary to the session layer: the connection trait watches and notifies
//! deliver events through, and the per-connection watch registry consulted on
//! connection reset.

mod registry;
pub use registry::*;


use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::WatcherId;

/// In-memory form of the messages delivered to client connections. Wire
/// encoding is the session layer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEvent {
    /// A broadcast payload delivered to one watch subscription.
    Notify {
        /// Cookie of the receiving watch
        cookie: u64,
        notify_id: u64,
        version: u64,
        /// Global id of the broadcasting client
        notifier_id: u64,
        payload: Vec<u8>,
    },

    /// Aggregated completion delivered to the client that originated a
    /// broadcast. Every watcher outstanding at completion appears in
    /// `missed`; every watcher that acknowledged appears in `replies`.
    NotifyComplete {
        /// Linger cookie context supplied by the broadcasting client
        cookie: u64,
        notify_id: u64,
        version: u64,
        notifier_id: u64,
        replies: Vec<(WatcherId, Vec<u8>)>,
        missed: Vec<WatcherId>,
        /// Set when completion was forced by the broadcast deadline rather
        /// than the last acknowledgement
        timed_out: bool,
    },

    /// The node dropped this watch (explicit unwatch or liveness expiry).
    Disconnect { cookie: u64 },
}

/// One client connection as seen by this engine.
///
/// Implemented by the session layer; delivery is fire-and-forget into the
/// session's outbound queue and must not block.
pub trait ClientConn: Send + Sync + 'static {
    fn send_event(
        &self,
        event: WatchEvent,
    );

    /// The connection's watch registry, if the session tracks one.
    fn registry(&self) -> Option<&ConnWatchRegistry>;

    /// Remote address, for diagnostics only.
    fn peer_addr(&self) -> String;
}

pub type ConnRef = Arc<dyn ClientConn>;
