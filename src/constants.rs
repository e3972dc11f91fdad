//-----------------------------------------------------------
// Protocol timeout defaults (seconds)

/// Liveness window applied when a watch registration asks for timeout 0
pub(crate) const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 30;

/// Lower/upper clamp for client-requested watch timeouts
pub(crate) const MIN_WATCH_TIMEOUT_SECS: u64 = 1;
pub(crate) const MAX_WATCH_TIMEOUT_SECS: u64 = 3600;

/// Completion deadline applied when a broadcast asks for timeout 0
pub(crate) const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 30;

//-----------------------------------------------------------
// Resource caps

/// Watch registrations accepted per object before TooManyWatchers
pub(crate) const DEFAULT_MAX_WATCHERS_PER_OBJECT: usize = 1024;
