use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_NOTIFY_TIMEOUT_SECS;

/// Broadcast completion parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotifyConfig {
    /// Completion deadline applied when a broadcast requests timeout 0
    #[serde(default = "default_notify_timeout")]
    pub default_timeout_secs: u64,
}

impl NotifyConfig {
    /// Resolve a client-requested broadcast timeout (seconds, 0 = default).
    pub fn resolve_timeout(
        &self,
        requested_secs: u32,
    ) -> Duration {
        if requested_secs == 0 {
            Duration::from_secs(self.default_timeout_secs)
        } else {
            Duration::from_secs(requested_secs as u64)
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_notify_timeout(),
        }
    }
}

fn default_notify_timeout() -> u64 {
    DEFAULT_NOTIFY_TIMEOUT_SECS
}
