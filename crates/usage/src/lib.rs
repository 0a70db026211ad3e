#![forbid(unsafe_code)]

mod app;
mod classifier;
mod error;
mod evaluation;
pub mod policy;
pub mod source;

pub use app::{AppStatus, TrackedApp};
pub use classifier::UsageClassifier;
pub use error::Error;
pub use evaluation::Evaluation;
pub use policy::{Thresholds, UsagePolicy};
pub use source::{
    ForegroundEvent, InstalledApp, StaticUsageSource, UsageSnapshot, UsageSource,
    current_foreground, last_foreground,
};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Convert a duration to whole milliseconds, saturating on overflow.
pub fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
