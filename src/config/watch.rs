use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_MAX_WATCHERS_PER_OBJECT;
use crate::constants::DEFAULT_WATCH_TIMEOUT_SECS;
use crate::constants::MAX_WATCH_TIMEOUT_SECS;
use crate::constants::MIN_WATCH_TIMEOUT_SECS;

/// Liveness parameters for watch subscriptions
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WatchConfig {
    /// Liveness window applied when a registration requests timeout 0
    #[serde(default = "default_watch_timeout")]
    pub default_timeout_secs: u64,

    /// Smallest liveness window a client may request
    /// Requests below this are clamped up
    #[serde(default = "default_min_timeout")]
    pub min_timeout_secs: u64,

    /// Largest liveness window a client may request
    /// Requests above this are clamped down
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,

    /// Watch registrations accepted per object before registration is
    /// refused with `WatchError::TooManyWatchers`
    #[serde(default = "default_max_watchers")]
    pub max_watchers_per_object: usize,
}

impl WatchConfig {
    /// Resolve a client-requested timeout (seconds, 0 = use default) into
    /// the effective liveness window.
    pub fn clamp_timeout(
        &self,
        requested_secs: u32,
    ) -> Duration {
        let secs = if requested_secs == 0 {
            self.default_timeout_secs
        } else {
            (requested_secs as u64).clamp(self.min_timeout_secs, self.max_timeout_secs)
        };
        Duration::from_secs(secs)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_watch_timeout(),
            min_timeout_secs: default_min_timeout(),
            max_timeout_secs: default_max_timeout(),
            max_watchers_per_object: default_max_watchers(),
        }
    }
}

fn default_watch_timeout() -> u64 {
    DEFAULT_WATCH_TIMEOUT_SECS
}

fn default_min_timeout() -> u64 {
    MIN_WATCH_TIMEOUT_SECS
}

fn default_max_timeout() -> u64 {
    MAX_WATCH_TIMEOUT_SECS
}

fn default_max_watchers() -> usize {
    DEFAULT_MAX_WATCHERS_PER_OBJECT
}
