pub mod config;
pub mod manager;
pub mod registry;

pub use config::{Config, ConfigError};
pub use manager::{BlockDataManager, NodeError};

use stashd_scan::progress::{ProgressSink, ScanPhase};

/// Progress sink that forwards phase events to the log.
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn progress(&self, phase: ScanPhase, fraction: f64, elapsed_secs: u64, percent: u32) {
        stashd_log::log_info!(
            "{} {percent}% ({fraction:.4}) after {elapsed_secs}s",
            phase.as_str(),
        );
    }
}
