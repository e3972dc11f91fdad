//! Configuration for the watch/notify subscription engine.
//!
//! Settings are loaded with the following priority:
//! 1. Default values (hardcoded)
//! 2. Optional TOML config file
//! 3. Environment variables with the `WATCH` prefix (highest priority)

mod notify;
mod watch;
pub use notify::*;
pub use watch::*;


use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Watch liveness parameters
    #[serde(default)]
    pub watch: WatchConfig,
    /// Notify broadcast parameters
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Settings {
    /// Load configuration from an optional file plus `WATCH`-prefixed
    /// environment variables (e.g. `WATCH__WATCH__DEFAULT_TIMEOUT_SECS`).
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let config = builder
            .add_source(Environment::with_prefix("WATCH").separator("__").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
