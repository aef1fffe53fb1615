use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures scoped to one subscriber's lifecycle. Never fatal to the fleet.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to spawn UE simulator for {imsi}: {source}")]
    Spawn {
        imsi: String,
        #[source]
        source: std::io::Error,
    },

    #[error("deregistration for {imsi} failed: {reason}")]
    ControlCommand { imsi: String, reason: String },

    #[error("UE process for {imsi} did not exit within {grace:?}")]
    TeardownTimeout { imsi: String, grace: Duration },
}

/// Configuration problems detected before any subscriber starts.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("UE configuration directory not found: {}", .0.display())]
    ConfigDirMissing(PathBuf),

    #[error("IMSI prefix must be non-empty and all digits, got {0:?}")]
    InvalidImsiPrefix(String),

    #[error("IMSI prefix {prefix:?} is too long: with a 3-digit ordinal the IMSI exceeds 15 digits")]
    ImsiTooLong { prefix: String },

    #[error("subscriber count must be between 1 and 999, got {0}")]
    InvalidSubscriberCount(u32),

    #[error("{phase} hold range is inverted: min {min:?} > max {max:?}")]
    InvalidHoldRange {
        phase: &'static str,
        min: Duration,
        max: Duration,
    },
}
