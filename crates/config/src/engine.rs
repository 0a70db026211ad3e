#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Engine {
    /// Interval between two classification passes.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub sync_interval: Duration,

    /// Run a classification pass immediately on startup.
    pub run_on_start: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(15 * 60),
            run_on_start: true,
        }
    }
}
