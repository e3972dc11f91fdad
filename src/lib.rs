mod config;
mod conn;
mod constants;
mod core;
mod errors;
mod metrics;
mod timer;

pub use conn::*;
pub use self::core::*;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use timer::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
