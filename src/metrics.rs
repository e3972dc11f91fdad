use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    pub static ref ACTIVE_WATCHES: IntGauge =
        IntGauge::new("active_watches", "Number of live watch subscriptions")
            .expect("metric can not be created");

    pub static ref WATCH_TIMEOUTS: IntCounter =
        IntCounter::new("watch_timeouts_total", "Watches expired by the liveness timer")
            .expect("metric can not be created");

    pub static ref NOTIFY_COMPLETIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("notify_completions_total", "Notify broadcasts resolved, by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");
}

/// Registers the engine's metrics with the host process's registry.
pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(ACTIVE_WATCHES.clone()))?;
    registry.register(Box::new(WATCH_TIMEOUTS.clone()))?;
    registry.register(Box::new(NOTIFY_COMPLETIONS.clone()))?;
    Ok(())
}
