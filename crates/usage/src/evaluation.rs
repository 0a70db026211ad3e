#![forbid(unsafe_code)]

use crate::TrackedApp;

/// The diff produced by one classification pass. Consumed once, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Rows to upsert, sorted by package name.
    pub updates: Vec<TrackedApp>,
    pub packages_to_remove: Vec<String>,
    /// Crossed the warning threshold during this pass.
    pub apps_to_notify: Vec<TrackedApp>,
    /// Crossed the disable threshold during this pass.
    pub apps_for_disable_recommendation: Vec<TrackedApp>,
}
